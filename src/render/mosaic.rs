// src/render/mosaic.rs
//! Gallery compositor: downloads up to four images and tiles them on one
//! square transparent canvas.
//!
//! Layouts: 1 → full canvas, 2 → side by side, 3 → two on top with the third
//! spanning the bottom row, 4 → 2×2 grid.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops, imageops::FilterType, DynamicImage, ImageEncoder, RgbaImage};
use std::time::Duration;

use super::{Compositor, MAX_GALLERY_IMAGES};

pub const DEFAULT_CANVAS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Cell {
    fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Tile rectangles for `n` images on a `size`×`size` canvas (n is capped at 4).
pub fn layout(n: usize, size: u32) -> Vec<Cell> {
    let half = size / 2;
    let rest = size - half;
    match n.min(MAX_GALLERY_IMAGES) {
        0 => Vec::new(),
        1 => vec![Cell::new(0, 0, size, size)],
        2 => vec![Cell::new(0, 0, half, size), Cell::new(half, 0, rest, size)],
        3 => vec![
            Cell::new(0, 0, half, half),
            Cell::new(half, 0, rest, half),
            Cell::new(0, half, size, rest),
        ],
        _ => vec![
            Cell::new(0, 0, half, half),
            Cell::new(half, 0, rest, half),
            Cell::new(0, half, half, rest),
            Cell::new(half, half, rest, rest),
        ],
    }
}

/// Tile decoded images and encode the canvas as PNG.
pub fn compose_images(images: &[DynamicImage], size: u32) -> Result<Vec<u8>> {
    let mut canvas = RgbaImage::new(size, size);

    for (img, cell) in images.iter().zip(layout(images.len(), size)) {
        let tile = img.resize(cell.width, cell.height, FilterType::Triangle).to_rgba8();
        // center inside the cell
        let x = cell.x + (cell.width - tile.width().min(cell.width)) / 2;
        let y = cell.y + (cell.height - tile.height().min(cell.height)) / 2;
        imageops::overlay(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(canvas.as_raw(), size, size, image::ExtendedColorType::Rgba8)
        .context("PNG encode")?;
    Ok(buf)
}

pub struct MosaicCompositor {
    client: reqwest::Client,
    size: u32,
}

impl Default for MosaicCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl MosaicCompositor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            size: DEFAULT_CANVAS,
        }
    }

    pub fn with_canvas(mut self, size: u32) -> Self {
        self.size = size.max(2);
        self
    }

    async fn fetch_image(&self, url: &str) -> Option<DynamicImage> {
        let rsp = match self.client.get(url).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::warn!(url, error = %e, "Failed to fetch {url}");
                return None;
            }
        };
        if !rsp.status().is_success() {
            tracing::warn!(url, status = rsp.status().as_u16(), "Failed to fetch {url}");
            return None;
        }
        let bytes = match rsp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(url, error = %e, "image body read failed");
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img),
            Err(e) => {
                tracing::warn!(url, error = %e, "image decode failed");
                None
            }
        }
    }
}

#[async_trait]
impl Compositor for MosaicCompositor {
    async fn compose(&self, urls: &[String]) -> Option<Vec<u8>> {
        let mut images = Vec::with_capacity(urls.len().min(MAX_GALLERY_IMAGES));
        for url in urls.iter().take(MAX_GALLERY_IMAGES) {
            if let Some(img) = self.fetch_image(url).await {
                images.push(img);
            }
        }
        if images.is_empty() {
            return None;
        }

        let size = self.size;
        match tokio::task::spawn_blocking(move || compose_images(&images, size)).await {
            Ok(Ok(png)) => Some(png),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "mosaic composition failed");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "mosaic task panicked");
                None
            }
        }
    }
}
