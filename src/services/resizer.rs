//! Variant producers.
//!
//! A [`Resizer`] is a single-pass iterator of variants that also describes
//! the original it derives from. [`ImageResizer`] is the `image`-crate
//! implementation: it decodes once, on the first variant, and renders one
//! [`SizeSpec`] per step.

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        file::FileSource,
        variant::{ImageVariant, OriginalImage, SizeSpec},
    },
};
use image::{DynamicImage, GenericImageView, ImageFormat, imageops::FilterType};
use std::io::Cursor;
use tracing::debug;

/// Lazy, finite, single-pass sequence of variants.
pub trait Resizer: Iterator<Item = ConveyResult<ImageVariant>> + Send {
    fn original(&self) -> &OriginalImage;
}

impl<R: Resizer + ?Sized> Resizer for Box<R> {
    fn original(&self) -> &OriginalImage {
        (**self).original()
    }
}

pub struct ImageResizer {
    original: OriginalImage,
    sizes: std::vec::IntoIter<SizeSpec>,
    decoded: Option<DynamicImage>,
}

impl ImageResizer {
    pub fn new(source: &FileSource, sizes: Vec<SizeSpec>) -> Self {
        Self {
            original: OriginalImage::from_source(source),
            sizes: sizes.into_iter(),
            decoded: None,
        }
    }

    fn image(&mut self) -> ConveyResult<&DynamicImage> {
        if self.decoded.is_none() {
            let img = image::load_from_memory(&self.original.data)
                .map_err(|e| ConveyError::Resize(format!("failed to load image: {e}")))?;
            self.decoded = Some(img);
        }
        self.decoded
            .as_ref()
            .ok_or_else(|| ConveyError::Resize("image not decoded".into()))
    }

    /// Output format: the declared one (extension or mime type), else
    /// whatever the original is.
    fn output_format(&self, spec: &SizeSpec) -> ConveyResult<ImageFormat> {
        let format = match spec.format.as_deref() {
            Some(mime) if mime.contains('/') => ImageFormat::from_mime_type(mime),
            Some(declared) => ImageFormat::from_extension(declared.trim_start_matches('.')),
            None => ImageFormat::from_mime_type(&self.original.mime_type)
                .or_else(|| image::guess_format(&self.original.data).ok()),
        };
        format.ok_or_else(|| {
            ConveyError::Resize(format!("no output format for variant `{}`", spec.key))
        })
    }

    fn render(&mut self, spec: &SizeSpec) -> ConveyResult<ImageVariant> {
        let format = self.output_format(spec)?;
        let img = self.image()?;

        let resized = if spec.crop {
            let (x, y, width, height) = centre_crop(img.dimensions(), (spec.width, spec.height));
            img.crop_imm(x, y, width, height)
                .resize_exact(spec.width, spec.height, FilterType::Lanczos3)
        } else {
            img.resize(spec.width, spec.height, FilterType::Lanczos3)
        };
        // jpeg has no alpha channel
        let resized = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(resized.to_rgb8())
        } else {
            resized
        };

        let mut buffer = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut buffer), format)
            .map_err(|e| ConveyError::Resize(format!("failed to encode `{}`: {e}", spec.key)))?;

        debug!(
            variant = %spec.key,
            width = resized.width(),
            height = resized.height(),
            bytes = buffer.len(),
            "variant rendered"
        );
        Ok(ImageVariant::new(spec.key.clone(), buffer, spec.format.as_deref()))
    }
}

impl Iterator for ImageResizer {
    type Item = ConveyResult<ImageVariant>;

    fn next(&mut self) -> Option<Self::Item> {
        let spec = self.sizes.next()?;
        Some(self.render(&spec))
    }
}

impl Resizer for ImageResizer {
    fn original(&self) -> &OriginalImage {
        &self.original
    }
}

/// Largest centred region of `source` with the aspect ratio of `target`.
fn centre_crop(source: (u32, u32), target: (u32, u32)) -> (u32, u32, u32, u32) {
    let (sw, sh) = (u64::from(source.0), u64::from(source.1));
    let (tw, th) = (u64::from(target.0.max(1)), u64::from(target.1.max(1)));

    let (cw, ch) = if sw * th > sh * tw {
        ((sh * tw / th).max(1), sh)
    } else {
        (sw, (sw * th / tw).max(1))
    };
    let x = (sw - cw.min(sw)) / 2;
    let y = (sh - ch.min(sh)) / 2;
    (x as u32, y as u32, cw as u32, ch as u32)
}
