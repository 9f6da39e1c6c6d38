//! In-memory fixtures for unit tests: JPEGs with hand-built EXIF segments.

use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;

/// Solid-colour JPEG without any metadata
pub fn plain_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([120, 160, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
        .unwrap();
    buf
}

pub type Dms = (u32, u32, u32);

#[derive(Default)]
pub struct ExifFixture {
    pub date_time_original: Option<&'static str>,
    pub offset_time_original: Option<&'static str>,
    pub orientation: Option<u16>,
    pub latitude: Option<(Dms, &'static str)>,
    pub longitude: Option<(Dms, &'static str)>,
}

fn ascii(tag: Tag, s: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![s.as_bytes().to_vec()]),
    }
}

fn dms(tag: Tag, (d, m, s): Dms) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![
            Rational { num: d, denom: 1 },
            Rational { num: m, denom: 1 },
            Rational { num: s, denom: 1 },
        ]),
    }
}

impl ExifFixture {
    fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if let Some(o) = self.orientation {
            fields.push(Field {
                tag: Tag::Orientation,
                ifd_num: In::PRIMARY,
                value: Value::Short(vec![o]),
            });
        }
        if let Some(dt) = self.date_time_original {
            fields.push(ascii(Tag::DateTimeOriginal, dt));
        }
        if let Some(off) = self.offset_time_original {
            fields.push(ascii(Tag::OffsetTimeOriginal, off));
        }
        if let Some((value, hemisphere)) = self.latitude {
            fields.push(dms(Tag::GPSLatitude, value));
            fields.push(ascii(Tag::GPSLatitudeRef, hemisphere));
        }
        if let Some((value, hemisphere)) = self.longitude {
            fields.push(dms(Tag::GPSLongitude, value));
            fields.push(ascii(Tag::GPSLongitudeRef, hemisphere));
        }
        fields
    }

    /// JPEG of the given size carrying this fixture's tags
    pub fn jpeg(&self, width: u32, height: u32) -> Vec<u8> {
        let fields = self.fields();
        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();
        splice_app1(&plain_jpeg(width, height), &tiff.into_inner())
    }
}

/// Insert an EXIF APP1 segment right after SOI
fn splice_app1(jpeg: &[u8], tiff: &[u8]) -> Vec<u8> {
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(tiff);
    let segment_len = (payload.len() + 2) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}
