// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF rasterizer: turns a scanned PDF into one raster per page by pulling
// the page's embedded scan image out of its XObject resources with `lopdf`.

use std::collections::HashSet;

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use medicord_core::error::MedicordError;
use tracing::{debug, info, instrument, warn};

/// Pixels per PDF point used for pages that carry no image.
const BLANK_PAGE_SCALE: f64 = 1.0;

/// Refuse embedded images larger than this on either side.
const MAX_IMAGE_SIDE: i64 = 40_000;

/// Longest side of a blank stand-in page. Larger MediaBoxes are scaled down.
const MAX_BLANK_SIDE: f64 = 4_096.0;

/// US Letter in points.
const DEFAULT_PAGE_SIZE: (u32, u32) = (612, 792);

/// Converts paginated document bytes into an ordered sequence of rasters.
pub trait PageRasterizer: Send + Sync {
    /// Count pages without decoding any image data.
    fn page_count(&self, data: &[u8]) -> Result<usize, MedicordError>;

    /// One raster per page, in page order.
    fn rasterize(&self, data: &[u8]) -> Result<Vec<DynamicImage>, MedicordError>;
}

/// Rasterizer for scanned PDFs: each page's largest embedded image is the page.
///
/// Pages with no decodable image become a white raster sized from the
/// MediaBox, which the recognition engines report as empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedImageRasterizer;

impl PageRasterizer for EmbeddedImageRasterizer {
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    fn page_count(&self, data: &[u8]) -> Result<usize, MedicordError> {
        let document = load(data)?;
        let count = document.get_pages().len();
        debug!(count, "PDF page count");
        Ok(count)
    }

    #[instrument(skip_all, fields(bytes_len = data.len()))]
    fn rasterize(&self, data: &[u8]) -> Result<Vec<DynamicImage>, MedicordError> {
        let document = load(data)?;
        let pages = document.get_pages();
        info!(pages = pages.len(), "Rasterizing PDF");

        // get_pages() is keyed by 1-based page number, so iteration is in order.
        let rasters = pages
            .iter()
            .map(|(number, page_id)| rasterize_page(&document, *number, *page_id))
            .collect();
        Ok(rasters)
    }
}

fn load(data: &[u8]) -> Result<Document, MedicordError> {
    Document::load_mem(data)
        .map_err(|err| MedicordError::UnreadableDocument(format!("failed to parse PDF: {}", err)))
}

fn rasterize_page(document: &Document, number: u32, page_id: ObjectId) -> DynamicImage {
    let mut candidates = Vec::new();
    if let Some(resources) = inherited_entry(document, page_id, b"Resources")
        .and_then(|obj| resolve_dict(document, obj))
    {
        collect_images(document, resources, &mut HashSet::new(), &mut candidates);
    }

    // Scans usually carry a single full-page image; take the biggest one.
    candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.width * candidate.height));
    for candidate in &candidates {
        match decode_image(document, candidate) {
            Ok(image) => {
                debug!(
                    page = number,
                    width = image.width(),
                    height = image.height(),
                    "Decoded page image"
                );
                return image;
            }
            Err(reason) => {
                warn!(page = number, object = ?candidate.object_id, %reason, "Skipping undecodable page image");
            }
        }
    }

    let (width, height) = media_box_size(document, page_id);
    warn!(page = number, width, height, "No page image found; using blank page");
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255u8])))
}

// -- Resource walking ---------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ImageCandidate {
    object_id: ObjectId,
    width: i64,
    height: i64,
}

/// Look up `key` on the page, then up the `/Parent` chain.
fn inherited_entry<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = document.get_dictionary(page_id).ok();
    let mut visited = HashSet::new();
    while let Some(dict) = current {
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        let parent = dict.get(b"Parent").ok().and_then(|p| p.as_reference().ok())?;
        if !visited.insert(parent) {
            return None;
        }
        current = document.get_dictionary(parent).ok();
    }
    None
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => document.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
        _ => None,
    }
}

fn name_of(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

/// Image XObjects reachable from a resource dictionary, including those
/// nested inside form XObjects.
fn collect_images(
    document: &Document,
    resources: &Dictionary,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<ImageCandidate>,
) {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| resolve_dict(document, obj))
    else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Ok(object_id) = value.as_reference() else {
            continue;
        };
        if !visited.insert(object_id) {
            continue;
        }
        let Ok(stream) = document.get_object(object_id).and_then(|o| o.as_stream()) else {
            continue;
        };
        match stream.dict.get(b"Subtype").ok().and_then(name_of) {
            Some(b"Image") => {
                let dimension = |key: &[u8]| {
                    stream
                        .dict
                        .get(key)
                        .ok()
                        .and_then(|v| v.as_i64().ok())
                        .unwrap_or(0)
                };
                let (width, height) = (dimension(b"Width"), dimension(b"Height"));
                if width > 0 && height > 0 {
                    out.push(ImageCandidate {
                        object_id,
                        width,
                        height,
                    });
                }
            }
            Some(b"Form") => {
                if let Some(nested) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|obj| resolve_dict(document, obj))
                {
                    collect_images(document, nested, visited, out);
                }
            }
            _ => {}
        }
    }
}

fn media_box_size(document: &Document, page_id: ObjectId) -> (u32, u32) {
    let numbers: Vec<f64> = inherited_entry(document, page_id, b"MediaBox")
        .and_then(|obj| match obj {
            Object::Reference(id) => document.get_object(*id).ok(),
            other => Some(other),
        })
        .and_then(|obj| obj.as_array().ok())
        .map(|items| items.iter().filter_map(number_of).collect())
        .unwrap_or_default();

    let [x0, y0, x1, y1] = numbers[..] else {
        return DEFAULT_PAGE_SIZE;
    };
    blank_page_size((x1 - x0).abs(), (y1 - y0).abs())
}

/// Raster size for a blank page of `width` x `height` points, keeping the
/// aspect ratio but never exceeding `MAX_BLANK_SIDE`.
fn blank_page_size(width: f64, height: f64) -> (u32, u32) {
    let (width, height) = (width * BLANK_PAGE_SCALE, height * BLANK_PAGE_SCALE);
    if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 {
        return DEFAULT_PAGE_SIZE;
    }
    let shrink = (MAX_BLANK_SIDE / width.max(height)).min(1.0);
    let side = |points: f64| (points * shrink).round().clamp(1.0, MAX_BLANK_SIDE) as u32;
    (side(width), side(height))
}

fn number_of(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

// -- Image decoding -----------------------------------------------------------

fn decode_image(document: &Document, candidate: &ImageCandidate) -> Result<DynamicImage, String> {
    if candidate.width > MAX_IMAGE_SIDE || candidate.height > MAX_IMAGE_SIDE {
        return Err(format!(
            "image {}x{} exceeds size limit",
            candidate.width, candidate.height
        ));
    }
    let (width, height) = (candidate.width as u32, candidate.height as u32);

    let stream = document
        .get_object(candidate.object_id)
        .and_then(|o| o.as_stream())
        .map_err(|err| format!("image stream unavailable: {}", err))?;

    let filters = filter_names(stream);
    if filters.iter().any(|f| f == "DCTDecode") {
        return image::load_from_memory(&stream.content)
            .map_err(|err| format!("JPEG decode failed: {}", err));
    }
    if let Some(unsupported) = filters
        .iter()
        .find(|f| !matches!(f.as_str(), "FlateDecode" | "LZWDecode" | "ASCIIHexDecode" | "ASCII85Decode"))
    {
        return Err(format!("unsupported image filter {}", unsupported));
    }

    let raw = decoded_bytes(stream)?;
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|v| v.as_i64().ok())
        .unwrap_or(8);
    let components = color_components(document, &stream.dict)
        .ok_or_else(|| "unsupported colour space".to_string())?;

    let pixels = width as usize * height as usize;
    let decoded = match (components, bits) {
        (1, 8) => raw
            .get(..pixels)
            .and_then(|bytes| GrayImage::from_raw(width, height, bytes.to_vec()))
            .map(DynamicImage::ImageLuma8),
        (1, 1) => unpack_bilevel(&raw, width, height).map(DynamicImage::ImageLuma8),
        (3, 8) => raw
            .get(..pixels * 3)
            .and_then(|bytes| RgbImage::from_raw(width, height, bytes.to_vec()))
            .map(DynamicImage::ImageRgb8),
        (4, 8) => cmyk_to_rgb(&raw, width, height).map(DynamicImage::ImageRgb8),
        _ => {
            return Err(format!(
                "unsupported layout: {} components at {} bits",
                components, bits
            ));
        }
    };
    decoded.ok_or_else(|| "image stream shorter than its dimensions".to_string())
}

fn filter_names(stream: &Stream) -> Vec<String> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).into_owned()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(name_of)
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

fn decoded_bytes(stream: &Stream) -> Result<Vec<u8>, String> {
    if filter_names(stream).is_empty() {
        return Ok(stream.content.clone());
    }
    // lopdf will not decompress streams marked as images; drop the marker
    // on a copy so the filter chain still runs.
    let mut copy = stream.clone();
    copy.dict.remove(b"Subtype");
    copy.decompressed_content()
        .map_err(|err| format!("stream decompression failed: {}", err))
}

fn color_components(document: &Document, dict: &Dictionary) -> Option<u8> {
    let value = dict.get(b"ColorSpace").ok()?;
    components_of(document, value, 0)
}

fn components_of(document: &Document, value: &Object, depth: u8) -> Option<u8> {
    if depth > 4 {
        return None;
    }
    match value {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceCMYK" => Some(4),
            _ => None,
        },
        Object::Reference(id) => document
            .get_object(*id)
            .ok()
            .and_then(|obj| components_of(document, obj, depth + 1)),
        Object::Array(items) => match items.first().and_then(name_of) {
            Some(b"ICCBased") => {
                let profile = match items.get(1)? {
                    Object::Reference(id) => document.get_object(*id).ok()?,
                    other => other,
                };
                let dict = match profile {
                    Object::Stream(stream) => &stream.dict,
                    Object::Dictionary(dict) => dict,
                    _ => return None,
                };
                dict.get(b"N").ok()?.as_i64().ok().and_then(|n| u8::try_from(n).ok())
            }
            Some(b"CalGray") => Some(1),
            Some(b"CalRGB") => Some(3),
            _ => None,
        },
        _ => None,
    }
}

/// Expand 1-bit rows (padded to whole bytes) into 8-bit gray.
fn unpack_bilevel(raw: &[u8], width: u32, height: u32) -> Option<GrayImage> {
    let (w, h) = (width as usize, height as usize);
    let row_bytes = w.div_ceil(8);
    if raw.len() < row_bytes * h {
        return None;
    }
    let mut gray = Vec::with_capacity(w * h);
    for y in 0..h {
        let row = &raw[y * row_bytes..(y + 1) * row_bytes];
        for x in 0..w {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            gray.push(if bit == 1 { 255 } else { 0 });
        }
    }
    GrayImage::from_raw(width, height, gray)
}

fn cmyk_to_rgb(raw: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let pixels = width as usize * height as usize;
    let bytes = raw.get(..pixels * 4)?;
    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in bytes.chunks_exact(4) {
        let inv_k = 255 - u16::from(chunk[3]);
        for channel in &chunk[..3] {
            let value = (255 - u16::from(*channel)) * inv_k / 255;
            rgb.push(value as u8);
        }
    }
    RgbImage::from_raw(width, height, rgb)
}
