//! Render one exposure index to a PPM file.
//!
//! Usage:
//!   cargo run --example render_exposure -- /data/exposure.index out.ppm [bias]
//!
//! The viewport covers the union of every segment's focal-plane rectangle,
//! scaled onto a 2048-pixel-wide raster.

use std::io::Write;
use std::sync::Arc;

use focaltile_core::RectF;
use focaltile_reader::{CachingReader, MosaicImage, RenderParams, ScaleMode};
use focaltile_render::BiasKind;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let index = args.next().expect("usage: render_exposure <index> <out.ppm> [bias]");
    let out_path = args.next().expect("usage: render_exposure <index> <out.ppm> [bias]");
    let bias = match args.next() {
        Some(name) => BiasKind::from_name(&name)?,
        None => BiasKind::SimpleOverscanSubtraction,
    };

    let reader = CachingReader::new();

    let segments = reader.read_segments(&index, 'E', None).await?;
    let region = segments
        .iter()
        .map(|s| *s.wcs())
        .reduce(|a, b| {
            let x = a.x.min(b.x);
            let y = a.y.min(b.y);
            RectF::new(
                x,
                y,
                (a.x + a.width).max(b.x + b.width) - x,
                (a.y + a.height).max(b.y + b.height) - y,
            )
        })
        .expect("index lists no segments");
    tracing::info!(?region, segments = segments.len(), "focal-plane extent");

    let width = 2048;
    let height = (width as f64 * region.height / region.width).ceil() as i32;
    let surface = Arc::new(MosaicImage::for_region(width, height, &region));

    let params = RenderParams {
        source_region: Some(region),
        bias,
        scale: ScaleMode::Global,
        ..RenderParams::default()
    };
    reader.render(&index, &params, surface.clone()).await?;

    let pixels = surface.pixels();
    let mut out = std::io::BufWriter::new(std::fs::File::create(&out_path)?);
    writeln!(out, "P6\n{width} {height}\n255")?;
    for p in pixels {
        out.write_all(&[(p >> 16) as u8, (p >> 8) as u8, p as u8])?;
    }
    tracing::info!(out = %out_path, "wrote mosaic");
    Ok(())
}
