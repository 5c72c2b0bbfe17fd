//! In-memory documents and images shared by the unit tests.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};

use crate::features::artifact::OverlayAsset;

/// A document with `page_count` text pages. MediaBox and Resources live on
/// the page tree root so pages inherit them.
pub(crate) fn sample_pdf(page_count: usize, width: i64, height: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for index in 0..page_count {
        let content = format!("BT /F1 24 Tf 72 {} Td (Page {}) Tj ET", height - 100, index + 1);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialize sample pdf");
    out
}

pub(crate) fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    encode(img, ImageOutputFormat::Png)
}

pub(crate) fn jpeg_bytes(img: &RgbaImage) -> Vec<u8> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
        .expect("encode jpeg");
    buf
}

fn encode(img: &RgbaImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode image");
    buf
}

pub(crate) fn solid_overlay(width: u32, height: u32, color: Rgba<u8>) -> OverlayAsset {
    OverlayAsset::from_image(RgbaImage::from_pixel(width, height, color)).expect("overlay")
}
