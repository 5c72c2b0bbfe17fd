use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{PlacementError, Result};
use crate::features::artifact::OverlayAsset;
use crate::features::geometry::Size;
use crate::features::mapper::MappedPlacement;

const XOBJECT_BASE_NAME: &str = "ImSig";
const MAX_TREE_DEPTH: usize = 64;

/// Visible page area in default user space (points, bottom-left origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub llx: f64,
    pub lly: f64,
    pub width: f64,
    pub height: f64,
}

/// A parsed document with one page selected for stamping. The input bytes
/// are only read; stamping works on this private copy.
pub struct PageTarget {
    doc: Document,
    page_id: ObjectId,
    page_index: usize,
    page_count: usize,
    page_box: PageBox,
}

impl PageTarget {
    /// Parse `bytes` and select the 0-based `page_index`. Fails with
    /// `EmptyDocument` before anything else when there are no pages.
    pub fn load(bytes: &[u8], page_index: usize, fallback_size: (f64, f64)) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| PlacementError::render("parse_pdf", e))?;
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(PlacementError::EmptyDocument);
        }
        let page_count = pages.len();
        let page_id = u32::try_from(page_index + 1)
            .ok()
            .and_then(|number| pages.get(&number).copied())
            .ok_or_else(|| {
                PlacementError::invalid(
                    "page_index",
                    "an existing 0-based page index",
                    format!("{page_index} (document has {page_count} pages)"),
                )
            })?;
        let page_box = page_box(&doc, page_id).unwrap_or(PageBox {
            llx: 0.0,
            lly: 0.0,
            width: fallback_size.0,
            height: fallback_size.1,
        });
        Ok(Self {
            doc,
            page_id,
            page_index,
            page_count,
            page_box,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.page_box.width, self.page_box.height)
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Draw `overlay` into `placement` (top-left page space) on top of the
    /// existing page content and serialize the whole document.
    pub fn stamp(mut self, overlay: &OverlayAsset, placement: &MappedPlacement, compress: bool) -> Result<Vec<u8>> {
        let image_id = embed_overlay(&mut self.doc, overlay, compress)?;
        let name = attach_xobject(&mut self.doc, self.page_id, image_id)?;

        let pdf_x = self.page_box.llx + placement.x;
        let pdf_y = self.page_box.lly + self.page_box.height - placement.y - placement.height;
        let draw = format!(
            "\nQ\nq {} 0 0 {} {} {} cm /{} Do Q\n",
            fmt_num(placement.width),
            fmt_num(placement.height),
            fmt_num(pdf_x),
            fmt_num(pdf_y),
            name
        );
        wrap_page_contents(&mut self.doc, self.page_id, draw.into_bytes())?;

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| PlacementError::render("write_pdf", e))?;
        if out.is_empty() {
            return Err(PlacementError::render("write_pdf", "serializer produced no bytes"));
        }
        Ok(out)
    }
}

/// Adds the overlay as an RGB image XObject with an 8-bit soft mask.
fn embed_overlay(doc: &mut Document, overlay: &OverlayAsset, compress: bool) -> Result<ObjectId> {
    let img = overlay.image();
    let (img_w, img_h) = img.dimensions();
    let mut rgb = Vec::with_capacity(img_w as usize * img_h as usize * 3);
    let mut alpha = Vec::with_capacity(img_w as usize * img_h as usize);
    for pixel in img.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
    }

    let smask = image_stream(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img_w as i64,
            "Height" => img_h as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        alpha,
        compress,
    )?;
    let smask_id = doc.add_object(smask);

    let image = image_stream(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img_w as i64,
            "Height" => img_h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "SMask" => smask_id,
        },
        rgb,
        compress,
    )?;
    Ok(doc.add_object(image))
}

fn image_stream(mut dict: Dictionary, data: Vec<u8>, compress: bool) -> Result<Stream> {
    if !compress {
        return Ok(Stream::new(dict, data));
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&data)
        .map_err(|e| PlacementError::render("compress_image", e))?;
    let packed = encoder
        .finish()
        .map_err(|e| PlacementError::render("compress_image", e))?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, packed))
}

/// Registers `image_id` under a fresh name in the page's own resource
/// dictionary. Inherited or shared resources are copied onto the page first
/// so other pages keep their resources untouched.
fn attach_xobject(doc: &mut Document, page_id: ObjectId, image_id: ObjectId) -> Result<String> {
    let mut resources = effective_resources(doc, page_id)?;
    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(Object::as_dict)
            .cloned()
            .map_err(|e| PlacementError::render("read_resources", e))?,
        Ok(_) => return Err(PlacementError::render("read_resources", "XObject entry is not a dictionary")),
        Err(_) => Dictionary::new(),
    };

    let mut name = XOBJECT_BASE_NAME.to_string();
    let mut suffix = 1;
    while xobjects.has(name.as_bytes()) {
        name = format!("{XOBJECT_BASE_NAME}{suffix}");
        suffix += 1;
    }
    xobjects.set(name.as_bytes().to_vec(), image_id);
    resources.set("XObject", xobjects);

    page_dict_mut(doc, page_id)?.set("Resources", resources);
    Ok(name)
}

fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(id) = current {
        if depth > MAX_TREE_DEPTH {
            break;
        }
        depth += 1;
        let dict = doc
            .get_object(id)
            .and_then(Object::as_dict)
            .map_err(|e| PlacementError::render("read_page", e))?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(res)) => return Ok(res.clone()),
            Ok(Object::Reference(res_id)) => {
                return doc
                    .get_object(*res_id)
                    .and_then(Object::as_dict)
                    .cloned()
                    .map_err(|e| PlacementError::render("read_resources", e));
            }
            Ok(_) => return Err(PlacementError::render("read_resources", "Resources entry is not a dictionary")),
            Err(_) => {}
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(Dictionary::new())
}

/// Turns the page's content into `[q, <original...>, draw]` so whatever
/// graphics state the original content leaves behind is popped before the
/// overlay is drawn.
fn wrap_page_contents(doc: &mut Document, page_id: ObjectId, draw: Vec<u8>) -> Result<()> {
    let existing: Vec<Object> = {
        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| PlacementError::render("read_page", e))?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(parts)) => parts.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(parts)) => parts.clone(),
            Ok(_) => return Err(PlacementError::render("read_contents", "unsupported Contents entry")),
            Err(_) => Vec::new(),
        }
    };

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let draw_id = doc.add_object(Stream::new(dictionary! {}, draw));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(draw_id));
    page_dict_mut(doc, page_id)?.set("Contents", contents);
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PlacementError::render("read_page", e))
}

/// CropBox, else MediaBox, looked up through the page tree.
fn page_box(doc: &Document, page_id: ObjectId) -> Option<PageBox> {
    for key in [&b"CropBox"[..], &b"MediaBox"[..]] {
        let mut current = Some(page_id);
        let mut depth = 0;
        while let Some(id) = current {
            if depth > MAX_TREE_DEPTH {
                break;
            }
            depth += 1;
            let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
            if let Some(found) = extract_box(doc, dict, key) {
                return Some(found);
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }
    }
    None
}

fn extract_box(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<PageBox> {
    let raw = dict.get(key).ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = resolved.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let x0 = obj_to_f64(&arr[0])?;
    let y0 = obj_to_f64(&arr[1])?;
    let x1 = obj_to_f64(&arr[2])?;
    let y1 = obj_to_f64(&arr[3])?;
    // A zero-area box is returned as is; the mapper rejects it.
    let width = (x1 - x0).abs();
    let height = (y1 - y0).abs();
    Some(PageBox {
        llx: x0.min(x1),
        lly: y0.min(y1),
        width,
        height,
    })
}

fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some((*f).into()),
        _ => None,
    }
}

/// Content-stream number: four decimals, trailing zeros dropped.
fn fmt_num(value: f64) -> String {
    if value.abs() < 0.00005 {
        return "0".into();
    }
    let text = format!("{value:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_fixtures::{sample_pdf, solid_overlay};
    use image::Rgba;

    fn page_content(doc: &Document, id: &Object) -> String {
        let id = id.as_reference().unwrap();
        let stream = doc.get_object(id).and_then(Object::as_stream).unwrap();
        String::from_utf8_lossy(&stream.content).into_owned()
    }

    fn placement(x: f64, y: f64, width: f64, height: f64, bounds: Size) -> MappedPlacement {
        MappedPlacement {
            x,
            y,
            width,
            height,
            bounds,
        }
    }

    #[test]
    fn zero_pages_is_empty_document() {
        let err = PageTarget::load(&sample_pdf(0, 595, 842), 0, (595.0, 842.0))
            .err()
            .unwrap();
        assert!(matches!(err, PlacementError::EmptyDocument));
    }

    #[test]
    fn garbage_bytes_are_render_failure() {
        let err = PageTarget::load(b"%PDF-1.5 nonsense", 0, (595.0, 842.0))
            .err()
            .unwrap();
        assert_eq!(err.code(), "render_failure");
    }

    #[test]
    fn page_index_out_of_range() {
        let err = PageTarget::load(&sample_pdf(2, 595, 842), 2, (595.0, 842.0))
            .err()
            .unwrap();
        match err {
            PlacementError::InvalidPlacementValue { field, .. } => assert_eq!(field, "page_index"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inherited_media_box_is_used() {
        let target = PageTarget::load(&sample_pdf(1, 200, 400), 0, (595.0, 842.0)).unwrap();
        assert_eq!(target.size(), Size::new(200.0, 400.0));
        assert_eq!(target.page_count(), 1);
    }

    #[test]
    fn stamp_draws_on_top_and_keeps_content() {
        let source = sample_pdf(2, 200, 400);
        let before = Document::load_mem(&source).unwrap();
        let pages_before = before.get_pages();
        let first_before = before.get_object(pages_before[&1]).and_then(Object::as_dict).unwrap();
        let original_contents = first_before.get(b"Contents").unwrap().clone();
        let second_before = before
            .get_object(pages_before[&2])
            .and_then(Object::as_dict)
            .unwrap()
            .clone();

        let target = PageTarget::load(&source, 0, (595.0, 842.0)).unwrap();
        let overlay = solid_overlay(20, 10, Rgba([0, 0, 255, 200]));
        let out = target
            .stamp(
                &overlay,
                &placement(50.0 / 1.5, 100.0 / 1.5, 100.0, 50.0, Size::new(200.0, 400.0)),
                true,
            )
            .unwrap();

        let doc = Document::load_mem(&out).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        let first = doc.get_object(pages[&1]).and_then(Object::as_dict).unwrap();
        let contents = first.get(b"Contents").and_then(Object::as_array).unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(page_content(&doc, &contents[0]), "q\n");
        assert_eq!(contents[1], original_contents);
        assert!(page_content(&doc, &contents[1]).contains("(Page 1) Tj"));
        let draw = page_content(&doc, &contents[2]);
        assert!(draw.starts_with("\nQ\n"), "{draw}");
        assert!(draw.contains("100 0 0 50 33.3333 283.3333 cm /ImSig Do Q"), "{draw}");

        let resources = first.get(b"Resources").and_then(Object::as_dict).unwrap();
        assert!(resources.get(b"Font").is_ok(), "inherited fonts must survive");
        let xobjects = resources.get(b"XObject").and_then(Object::as_dict).unwrap();
        let image_id = xobjects.get(b"ImSig").and_then(Object::as_reference).unwrap();
        let image = doc.get_object(image_id).and_then(Object::as_stream).unwrap();
        assert_eq!(image.dict.get(b"Width").and_then(Object::as_i64).unwrap(), 20);
        assert_eq!(image.dict.get(b"Height").and_then(Object::as_i64).unwrap(), 10);
        assert!(image.dict.get(b"SMask").is_ok());

        let operators: Vec<String> = doc
            .get_and_decode_page_content(pages[&1])
            .unwrap()
            .operations
            .into_iter()
            .map(|op| op.operator)
            .collect();
        assert_eq!(
            operators,
            ["q", "BT", "Tf", "Td", "Tj", "ET", "Q", "q", "cm", "Do", "Q"],
            "original text object must close before the overlay is drawn"
        );

        let second = doc.get_object(pages[&2]).and_then(Object::as_dict).unwrap();
        assert_eq!(second.get(b"Contents").unwrap(), second_before.get(b"Contents").unwrap());
        assert!(second.get(b"Resources").is_err());
    }

    #[test]
    fn existing_xobject_names_are_not_clobbered() {
        let target = PageTarget::load(&sample_pdf(1, 300, 300), 0, (595.0, 842.0)).unwrap();
        let overlay = solid_overlay(4, 4, Rgba([0, 0, 0, 255]));
        let once = target
            .stamp(&overlay, &placement(0.0, 0.0, 10.0, 10.0, Size::new(300.0, 300.0)), false)
            .unwrap();
        let twice = PageTarget::load(&once, 0, (595.0, 842.0))
            .unwrap()
            .stamp(&overlay, &placement(20.0, 20.0, 10.0, 10.0, Size::new(300.0, 300.0)), false)
            .unwrap();

        let doc = Document::load_mem(&twice).unwrap();
        let page_id = doc.get_pages()[&1];
        let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
        let xobjects = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"XObject"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(xobjects.has(b"ImSig"));
        assert!(xobjects.has(b"ImSig1"));
    }

    #[test]
    fn zero_width_media_box_is_kept() {
        let target = PageTarget::load(&sample_pdf(1, 0, 842), 0, (595.0, 842.0)).unwrap();
        assert_eq!(target.size(), Size::new(0.0, 842.0));
    }

    #[test]
    fn missing_media_box_uses_fallback() {
        let mut doc = Document::load_mem(&sample_pdf(1, 200, 400)).unwrap();
        let page_id = doc.get_pages()[&1];
        let pages_id = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|p| p.get(b"Parent"))
            .and_then(Object::as_reference)
            .unwrap();
        doc.get_object_mut(pages_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .remove(b"MediaBox");
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let target = PageTarget::load(&bytes, 0, (595.0, 842.0)).unwrap();
        assert_eq!(target.size(), Size::new(595.0, 842.0));
    }

    /// Page whose Resources, XObject table and Contents array all sit behind
    /// indirect references, with `ImSig` already taken.
    fn indirect_resources_pdf() -> Vec<u8> {
        let mut doc = Document::load_mem(&sample_pdf(1, 300, 300)).unwrap();
        let page_id = doc.get_pages()[&1];
        let original = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|p| p.get(b"Contents"))
            .unwrap()
            .clone();
        let logo_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(1), Object::Integer(1)],
            },
            Vec::new(),
        ));
        let xobjects_id = doc.add_object(dictionary! { "ImSig" => logo_id });
        let resources_id = doc.add_object(dictionary! { "XObject" => xobjects_id });
        let contents_id = doc.add_object(Object::Array(vec![original]));
        let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut).unwrap();
        page.set("Resources", resources_id);
        page.set("Contents", contents_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn indirect_xobjects_and_contents_array_are_followed() {
        let source = indirect_resources_pdf();
        let target = PageTarget::load(&source, 0, (595.0, 842.0)).unwrap();
        let overlay = solid_overlay(4, 4, Rgba([0, 0, 0, 255]));
        let out = target
            .stamp(&overlay, &placement(10.0, 10.0, 20.0, 20.0, Size::new(300.0, 300.0)), false)
            .unwrap();

        let doc = Document::load_mem(&out).unwrap();
        let page_id = doc.get_pages()[&1];
        let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
        let xobjects = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"XObject"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(xobjects.has(b"ImSig"));
        assert!(xobjects.has(b"ImSig1"));

        let contents = page.get(b"Contents").and_then(Object::as_array).unwrap();
        assert_eq!(contents.len(), 3);
        assert!(page_content(&doc, &contents[1]).contains("(Page 1) Tj"));
        assert!(page_content(&doc, &contents[2]).contains("/ImSig1 Do"));
    }

    #[test]
    fn fmt_num_trims() {
        assert_eq!(fmt_num(100.0), "100");
        assert_eq!(fmt_num(33.333333), "33.3333");
        assert_eq!(fmt_num(-0.0), "0");
        assert_eq!(fmt_num(2.5), "2.5");
    }
}
