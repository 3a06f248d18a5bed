//! Fan-out of one image into its original plus N variant uploads.

use crate::{
    errors::ConveyResult,
    models::{
        file::{extension_for_mime, mime_for_extension},
        object::PutReceipt,
        variant::{ImageVariant, OriginalImage, VariantOutcome, VariantReport},
    },
    services::{conveyor::Conveyor, resizer::Resizer},
};
use bytes::Bytes;
use tracing::{info, warn};

pub struct ImageConveyor<R: Resizer> {
    conveyor: Conveyor,
    resizer: R,
}

impl<R: Resizer> ImageConveyor<R> {
    pub fn new(conveyor: Conveyor, resizer: R) -> Self {
        Self { conveyor, resizer }
    }

    pub fn conveyor(&self) -> &Conveyor {
        &self.conveyor
    }

    pub fn original(&self) -> &OriginalImage {
        self.resizer.original()
    }

    /// Upload through the conveyor, defaulting any missing argument from the
    /// original: its bytes, `{obfuscated}{extension}` and its mime type.
    pub async fn upload(
        &self,
        data: Option<Bytes>,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> ConveyResult<PutReceipt> {
        let original = self.resizer.original();
        let data = data.unwrap_or_else(|| original.data.clone());
        let default_name = original.stored_name();
        let name = name.unwrap_or(&default_name);
        let mime_type = mime_type.unwrap_or(&original.mime_type);
        self.conveyor
            .upload_raw(data, Some(name), Some(mime_type))
            .await
    }

    /// Upload every variant; `true` only if all of them made it.
    ///
    /// Consumes the conveyor because the variant sequence is single-pass.
    pub async fn resize_and_upload(self) -> bool {
        self.resize_and_upload_detailed().await.all_succeeded()
    }

    /// Like [`Self::resize_and_upload`], keeping the per-variant results.
    ///
    /// A failed variant never stops the ones after it.
    pub async fn resize_and_upload_detailed(self) -> VariantReport {
        let Self { conveyor, resizer } = self;
        let original = resizer.original().clone();
        let mut report = VariantReport::default();

        for produced in resizer {
            let variant = match produced {
                Ok(variant) => variant,
                Err(err) => {
                    warn!(original = %original.obfuscated_name, error = %err, "variant could not be produced");
                    report.outcomes.push(VariantOutcome {
                        variant: None,
                        name: None,
                        result: Err(err),
                    });
                    continue;
                }
            };

            let (mime_type, extension) = variant_target(&original, &variant);
            let name = format!("{}_{}{}", original.obfuscated_name, variant.key, extension);
            let result = conveyor
                .upload_raw(variant.data, Some(&name), Some(&mime_type))
                .await;
            match &result {
                Ok(receipt) => info!(variant = %variant.key, key = %receipt.key, "variant uploaded"),
                Err(err) => warn!(variant = %variant.key, name = %name, error = %err, "variant upload failed"),
            }
            report.outcomes.push(VariantOutcome {
                variant: Some(variant.key),
                name: Some(name),
                result,
            });
        }

        report
    }
}

/// Mime type and dotted extension for a variant.
///
/// A declared format may be an extension (`jpeg`) or a mime type
/// (`image/webp`); without one the original's are used.
fn variant_target(original: &OriginalImage, variant: &ImageVariant) -> (String, String) {
    match variant.format.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        Some(mime) if mime.contains('/') => {
            let extension = extension_for_mime(mime)
                .map(|ext| format!(".{ext}"))
                .unwrap_or_default();
            (mime.to_string(), extension)
        }
        Some(format) => {
            let ext = format.trim_start_matches('.').to_ascii_lowercase();
            let mime = mime_for_extension(&ext)
                .map(str::to_string)
                .unwrap_or_else(|| format!("image/{ext}"));
            (mime, format!(".{ext}"))
        }
        None => (original.mime_type.clone(), original.extension.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> OriginalImage {
        OriginalImage {
            obfuscated_name: "abc123".into(),
            mime_type: "image/png".into(),
            extension: ".png".into(),
            data: Bytes::from_static(b"png"),
        }
    }

    #[test]
    fn declared_extension_wins() {
        let variant = ImageVariant::new("thumb", Bytes::new(), Some("jpeg"));
        assert_eq!(
            variant_target(&original(), &variant),
            ("image/jpeg".to_string(), ".jpeg".to_string())
        );
    }

    #[test]
    fn declared_mime_type_maps_to_extension() {
        let variant = ImageVariant::new("thumb", Bytes::new(), Some("image/webp"));
        assert_eq!(
            variant_target(&original(), &variant),
            ("image/webp".to_string(), ".webp".to_string())
        );
    }

    #[test]
    fn undeclared_format_falls_back_to_original() {
        let variant = ImageVariant::new("large", Bytes::new(), None);
        assert_eq!(
            variant_target(&original(), &variant),
            ("image/png".to_string(), ".png".to_string())
        );
    }
}
