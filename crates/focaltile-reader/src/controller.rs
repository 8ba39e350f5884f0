//! Caching Reader
//!
//! The main component of the mosaic renderer. Six single-flight caches form a
//! DAG, built bottom-up so each loader only ever calls leafward caches:
//!
//! ```text
//! lines ──► segments ──► raw data ──► bias factors ──► rendered tiles
//!                            │              │               ▲
//!                            └──────────────┴─► global scale┘
//! ```
//!
//! A render request walks the fabric from the top: fetch the index lines,
//! decode each line's segments in parallel, filter by the requested focal-plane
//! region, then fetch and composite each surviving segment's rendered tile as
//! it completes. Several clients panning over the same exposure concurrently
//! share every level of the fabric; the caches are what make that safe and
//! fast.
//!
//! The reader is cheap to clone (everything is shared) and must be constructed
//! inside a tokio runtime, which also hosts its once-a-minute stats reporter.

use std::sync::Arc;

use futures::future::FutureExt;
use tokio::task::JoinHandle;

use focaltile_cache::{spawn_stats_reporter, AsyncCache, REPORT_INTERVAL};
use focaltile_core::{
    Error, RawData, ReaderConfig, RectF, Result, Segment, SegmentDescriptor,
};
use focaltile_fits::{decode_raw, decode_segments, WcsOverride};
use focaltile_render::{
    default_color_map, merge_global, render_tile, BiasKind, CorrectionFactors, Histogram,
    RenderedTile,
};
use focaltile_store::ByteReader;

use crate::params::{GlobalScale, RenderParams, ScaleMode};
use crate::surface::RenderSurface;

/// Parsed, ordered index lines for one exposure.
fn parse_index(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SegmentKey {
    line: String,
    wcs_letter: char,
    wcs_override: Option<Arc<WcsOverride>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BiasKey {
    segment: Arc<Segment>,
    bias: BiasKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TileKey {
    segment: Arc<Segment>,
    bias: BiasKind,
    global_scale: Option<GlobalScale>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GlobalKey {
    segments: Vec<Arc<Segment>>,
    bias: BiasKind,
}

/// The cache fabric plus the render entry points.
#[derive(Clone)]
pub struct CachingReader {
    byte_reader: Arc<ByteReader>,
    lines_cache: AsyncCache<String, Vec<String>>,
    segment_cache: AsyncCache<SegmentKey, Vec<Arc<Segment>>>,
    raw_data_cache: AsyncCache<Arc<Segment>, RawData>,
    bias_cache: AsyncCache<BiasKey, CorrectionFactors>,
    tile_cache: AsyncCache<TileKey, RenderedTile>,
    global_cache: AsyncCache<GlobalKey, Vec<u64>>,
    _reporter: Arc<ReporterGuard>,
}

struct ReporterGuard(JoinHandle<()>);

impl Drop for ReporterGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Default for CachingReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CachingReader {
    /// Reader with configuration snapshotted from the environment.
    pub fn new() -> Self {
        Self::with_config(ReaderConfig::from_env())
    }

    pub fn with_config(config: ReaderConfig) -> Self {
        let byte_reader = Arc::new(ByteReader::new());

        let lines_cache = {
            let byte_reader = byte_reader.clone();
            AsyncCache::with_max_entries("lines", config.lines_cache_size, move |url: String| {
                let byte_reader = byte_reader.clone();
                async move {
                    let len = byte_reader.len(&url).await?;
                    let bytes = byte_reader.read(&url, 0, len as usize).await?;
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|_| Error::Io(format!("index {url} is not UTF-8")))?;
                    Ok(parse_index(text))
                }
                .boxed()
            })
        };

        let segment_cache = {
            let byte_reader = byte_reader.clone();
            AsyncCache::with_max_entries(
                "segment",
                config.segment_cache_size,
                move |key: SegmentKey| {
                    let byte_reader = byte_reader.clone();
                    async move {
                        let descriptor = SegmentDescriptor::parse(&key.line)?;
                        let segments = decode_segments(
                            &byte_reader,
                            &descriptor,
                            key.wcs_letter,
                            key.wcs_override.as_deref(),
                            false,
                        )
                        .await?;
                        Ok(segments.into_iter().map(Arc::new).collect())
                    }
                    .boxed()
                },
            )
        };

        let raw_data_cache = {
            let byte_reader = byte_reader.clone();
            AsyncCache::with_max_weight(
                "rawData",
                config.raw_data_cache_size_bytes,
                RawData::weight_bytes,
                move |segment: Arc<Segment>| {
                    let byte_reader = byte_reader.clone();
                    async move {
                        // The decode-time length is the freshness witness: a
                        // mismatch means the stored offsets may be lies.
                        let current_len = byte_reader.len(&segment.file).await?;
                        if current_len != segment.file_len {
                            return Err(Error::Io(format!(
                                "{} changed size ({} -> {current_len}) since headers were read",
                                segment.file, segment.file_len
                            )));
                        }
                        let bytes = byte_reader
                            .read(&segment.file, segment.data_offset, segment.data_len)
                            .await?;
                        let pixels = decode_raw(&segment, &bytes)?;
                        Ok(RawData::new(segment, pixels))
                    }
                    .boxed()
                },
            )
        };

        let bias_cache = {
            let raw_data_cache = raw_data_cache.clone();
            AsyncCache::with_max_entries(
                "biasCorrection",
                config.bias_correction_cache_size,
                move |key: BiasKey| {
                    let raw_data_cache = raw_data_cache.clone();
                    async move {
                        let raw = raw_data_cache.get(key.segment.clone()).await?;
                        key.bias.compute(raw.pixels.as_int(), &key.segment)
                    }
                    .boxed()
                },
            )
        };

        let tile_cache = {
            let raw_data_cache = raw_data_cache.clone();
            let bias_cache = bias_cache.clone();
            AsyncCache::with_max_weight(
                "bufferedImage",
                config.buffered_image_cache_size_bytes,
                RenderedTile::weight_bytes,
                move |key: TileKey| {
                    let raw_data_cache = raw_data_cache.clone();
                    let bias_cache = bias_cache.clone();
                    async move {
                        let raw = raw_data_cache.get(key.segment.clone()).await?;
                        let factors = bias_cache
                            .get(BiasKey {
                                segment: key.segment.clone(),
                                bias: key.bias,
                            })
                            .await?;
                        render_tile(
                            &key.segment,
                            &raw,
                            &factors,
                            key.global_scale.as_ref().map(GlobalScale::bins),
                            default_color_map(),
                        )
                    }
                    .boxed()
                },
            )
        };

        let global_cache = {
            let raw_data_cache = raw_data_cache.clone();
            let bias_cache = bias_cache.clone();
            AsyncCache::with_max_entries(
                "globalScaling",
                config.global_scaling_cache_size,
                move |key: GlobalKey| {
                    let raw_data_cache = raw_data_cache.clone();
                    let bias_cache = bias_cache.clone();
                    async move {
                        let mut tasks = Vec::with_capacity(key.segments.len());
                        for segment in key.segments.iter().cloned() {
                            let raw_data_cache = raw_data_cache.clone();
                            let bias_cache = bias_cache.clone();
                            let bias = key.bias;
                            tasks.push(tokio::spawn(async move {
                                let raw = raw_data_cache.get(segment.clone()).await?;
                                let factors = bias_cache
                                    .get(BiasKey {
                                        segment: segment.clone(),
                                        bias,
                                    })
                                    .await?;
                                // float segments carry no ADC histogram
                                Ok::<_, Error>(raw.pixels.as_int().map(|data| {
                                    Histogram::build(
                                        &segment.datasec,
                                        data,
                                        segment.n_axis1,
                                        &factors,
                                    )
                                }))
                            }));
                        }

                        let mut histograms = Vec::with_capacity(tasks.len());
                        for task in tasks {
                            let histogram = task
                                .await
                                .map_err(|e| Error::Internal(format!("histogram task: {e}")))??;
                            histograms.extend(histogram);
                        }
                        Ok(merge_global(&histograms))
                    }
                    .boxed()
                },
            )
        };

        let reporter = spawn_stats_reporter(
            vec![
                lines_cache.report_handle(),
                segment_cache.report_handle(),
                raw_data_cache.report_handle(),
                bias_cache.report_handle(),
                tile_cache.report_handle(),
                global_cache.report_handle(),
            ],
            REPORT_INTERVAL,
        );

        Self {
            byte_reader,
            lines_cache,
            segment_cache,
            raw_data_cache,
            bias_cache,
            tile_cache,
            global_cache,
            _reporter: Arc::new(ReporterGuard(reporter)),
        }
    }

    /// Number of descriptors in an index, fetching and caching its lines.
    pub async fn pre_read_index(&self, index_url: &str) -> Result<usize> {
        Ok(self.lines(index_url).await?.len())
    }

    /// Current statistics of every cache in the fabric, in dependency order.
    pub fn cache_snapshots(&self) -> Vec<focaltile_cache::StatsSnapshot> {
        vec![
            self.lines_cache.snapshot(),
            self.segment_cache.snapshot(),
            self.raw_data_cache.snapshot(),
            self.bias_cache.snapshot(),
            self.tile_cache.snapshot(),
            self.global_cache.snapshot(),
        ]
    }

    /// Render every intersecting segment of `index_url` onto `surface`.
    ///
    /// With `ScaleMode::Global` and no precomputed handle, the global histogram
    /// is built (and cached) on the fly before tiles are requested.
    pub async fn render(
        &self,
        index_url: &str,
        params: &RenderParams,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<()> {
        match (params.scale, &params.global_scale) {
            (ScaleMode::Global, None) => {
                self.render_with_on_the_fly_global_scale(index_url, params, surface)
                    .await
            }
            (ScaleMode::Global, Some(scale)) => {
                self.render_tiles(index_url, params, Some(scale.clone()), surface)
                    .await
            }
            (ScaleMode::Amplifier, _) => {
                self.render_tiles(index_url, params, None, surface).await
            }
        }
    }

    async fn render_tiles(
        &self,
        index_url: &str,
        params: &RenderParams,
        global_scale: Option<GlobalScale>,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<()> {
        let lines = self.lines(index_url).await?;
        tracing::info!(index_url, files = lines.len(), "rendering");

        let mut line_tasks = Vec::with_capacity(lines.len());
        for line in lines.iter().cloned() {
            let reader = self.clone();
            let params = params.clone();
            let global_scale = global_scale.clone();
            let surface = surface.clone();
            line_tasks.push(tokio::spawn(async move {
                let segments = reader.segments_for_line(line, &params).await?;
                let chosen = segments_to_read(&segments, params.source_region.as_ref());

                let mut tile_tasks = Vec::with_capacity(chosen.len());
                for segment in chosen {
                    let reader = reader.clone();
                    let params = params.clone();
                    let global_scale = global_scale.clone();
                    let surface = surface.clone();
                    tile_tasks.push(tokio::spawn(async move {
                        let tile = reader
                            .tile_cache
                            .get(TileKey {
                                segment: segment.clone(),
                                bias: params.bias,
                                global_scale,
                            })
                            .await?;
                        composite(&*surface, &segment, &tile, &params);
                        Ok::<_, Error>(())
                    }));
                }
                join_tile_tasks(tile_tasks).await
            }));
        }

        let mut first_error = None;
        for task in line_tasks {
            let outcome = task
                .await
                .map_err(|e| Error::Internal(format!("render task: {e}")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(wrap_render_error(e)),
        }
    }

    async fn render_with_on_the_fly_global_scale(
        &self,
        index_url: &str,
        params: &RenderParams,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<()> {
        let scale = self
            .global_scale(index_url, params.bias, params.wcs_letter, params.wcs_override.clone())
            .await?;
        self.render_tiles(index_url, params, Some(scale), surface)
            .await
    }

    /// Every segment of every descriptor in the index, in index order.
    pub async fn read_segments(
        &self,
        index_url: &str,
        wcs_letter: char,
        wcs_override: Option<Arc<WcsOverride>>,
    ) -> Result<Vec<Arc<Segment>>> {
        let lines = self.lines(index_url).await?;

        let mut tasks = Vec::with_capacity(lines.len());
        for line in lines.iter().cloned() {
            let cache = self.segment_cache.clone();
            let wcs_override = wcs_override.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get(SegmentKey {
                        line,
                        wcs_letter,
                        wcs_override,
                    })
                    .await
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            let segments = task
                .await
                .map_err(|e| Error::Internal(format!("segment task: {e}")))?
                .map_err(Error::from)?;
            all.extend(segments.iter().cloned());
        }
        Ok(all)
    }

    /// Decoded pixels for one segment.
    pub async fn raw_data(&self, segment: Arc<Segment>) -> Result<Arc<RawData>> {
        self.raw_data_cache
            .get(segment)
            .await
            .map_err(Error::from)
    }

    /// Correction factors for one segment under a strategy.
    pub async fn correction_factors(
        &self,
        segment: Arc<Segment>,
        bias: BiasKind,
    ) -> Result<Arc<CorrectionFactors>> {
        self.bias_cache
            .get(BiasKey { segment, bias })
            .await
            .map_err(Error::from)
    }

    /// Rendered tile for one segment.
    pub async fn rendered_tile(
        &self,
        segment: Arc<Segment>,
        bias: BiasKind,
        global_scale: Option<GlobalScale>,
    ) -> Result<Arc<RenderedTile>> {
        self.tile_cache
            .get(TileKey {
                segment,
                bias,
                global_scale,
            })
            .await
            .map_err(Error::from)
    }

    /// The exposure-wide histogram for an index under a bias strategy.
    pub async fn global_scale(
        &self,
        index_url: &str,
        bias: BiasKind,
        wcs_letter: char,
        wcs_override: Option<Arc<WcsOverride>>,
    ) -> Result<GlobalScale> {
        let segments = self
            .read_segments(index_url, wcs_letter, wcs_override)
            .await?;
        let bins = self
            .global_cache
            .get(GlobalKey { segments, bias })
            .await
            .map_err(Error::from)?;
        Ok(GlobalScale::new(bins))
    }

    async fn lines(&self, index_url: &str) -> Result<Arc<Vec<String>>> {
        self.lines_cache
            .get(index_url.to_string())
            .await
            .map_err(Error::from)
    }

    async fn segments_for_line(
        &self,
        line: String,
        params: &RenderParams,
    ) -> Result<Arc<Vec<Arc<Segment>>>> {
        self.segment_cache
            .get(SegmentKey {
                line,
                wcs_letter: params.wcs_letter,
                wcs_override: params.wcs_override.clone(),
            })
            .await
            .map_err(Error::from)
    }

    /// Handle caches currently held by the byte reader (test support).
    pub fn byte_reader(&self) -> &Arc<ByteReader> {
        &self.byte_reader
    }
}

fn segments_to_read(
    segments: &[Arc<Segment>],
    source_region: Option<&RectF>,
) -> Vec<Arc<Segment>> {
    match source_region {
        None => segments.to_vec(),
        Some(region) => segments
            .iter()
            .filter(|s| s.intersects(region))
            .cloned()
            .collect(),
    }
}

async fn join_tile_tasks(tasks: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for task in tasks {
        let outcome = task
            .await
            .map_err(|e| Error::Internal(format!("tile task: {e}")))
            .and_then(|r| r);
        if let Err(e) = outcome {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// I/O failures surface unchanged; anything else becomes a generic render
/// failure, mirroring how the host image-I/O API reports them.
fn wrap_render_error(e: Error) -> Error {
    if e.is_io() {
        e
    } else {
        Error::Internal(format!("unexpected error during image reading: {e}"))
    }
}

/// Blit one completed tile onto the surface under its own transform stack.
fn composite(
    surface: &dyn RenderSurface,
    segment: &Segment,
    tile: &RenderedTile,
    params: &RenderParams,
) {
    let placement = segment.wcs_translation(params.show_bias_region);
    let crop = (!params.show_bias_region).then_some(&segment.datasec);

    if params.colormap.is_default() {
        surface.draw_tile(tile, placement, crop);
    } else {
        // tiles are cached in the default (grey) map; remap per request
        let remapped = RenderedTile {
            width: tile.width,
            height: tile.height,
            pixels: tile
                .pixels
                .iter()
                .map(|&p| params.colormap.rgb((p & 0xFF) as usize))
                .collect(),
        };
        surface.draw_tile(&remapped, placement, crop);
    }
}
