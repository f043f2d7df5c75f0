use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use viewer_automation::compare::{PixelBuffer, calc_image_diff_rms};
use viewer_automation::config::IMPERCEPTIBLE_DIFF_FILTER;
use viewer_automation::{Framebuffer, HeadlessHost};

fn noisy_copy(base: &PixelBuffer) -> PixelBuffer {
    let data = base
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, v)| if i % 7 == 0 { v.wrapping_add(3) } else { *v })
        .collect();
    PixelBuffer::new(base.width(), base.height(), base.format(), data).unwrap()
}

fn benchmark_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("calc_image_diff_rms");
    for (width, height) in [(320, 180), (1280, 720), (1920, 1080)] {
        let mut frame = Framebuffer::with_color(width, height, [30, 60, 90, 255]);
        frame.draw_text(8, height / 2, "Benchmark", [255, 255, 255, 255], [30, 60, 90, 255]);
        let expected = frame.to_pixel_buffer().unwrap();
        let actual = noisy_copy(&expected);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &(expected, actual),
            |b, (expected, actual)| {
                b.iter(|| calc_image_diff_rms(black_box(expected), black_box(actual), IMPERCEPTIBLE_DIFF_FILTER))
            },
        );
    }
    group.finish();
}

fn benchmark_render(c: &mut Criterion) {
    let host = HeadlessHost::new("null");
    c.bench_function("headless_render_frame", |b| {
        b.iter(|| black_box(host.render_frame()))
    });
}

criterion_group!(benches, benchmark_diff, benchmark_render);
criterion_main!(benches);
