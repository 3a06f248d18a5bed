//! Facade binding an inbound file to the conveyors.

use crate::{
    errors::ConveyResult,
    models::{
        address::Category,
        file::InboundFile,
        object::PutReceipt,
        variant::{SizeSpec, VariantReport},
    },
    services::{conveyor::Conveyor, image_conveyor::ImageConveyor, resizer::ImageResizer},
};
use tracing::{info, warn};

/// What an image conveyance produced.
#[derive(Debug)]
pub struct ImageConveyance {
    /// Stored name of the original, `{md5}{extension}`.
    pub name: String,
    pub url: String,
    pub original: PutReceipt,
    /// Empty when no sizes are configured.
    pub variants: VariantReport,
}

impl ImageConveyance {
    pub fn success(&self) -> bool {
        self.variants.all_succeeded()
    }
}

#[derive(Debug, Clone)]
pub struct Manager {
    conveyor: Conveyor,
    sizes: Vec<SizeSpec>,
}

impl Manager {
    pub fn new(conveyor: Conveyor) -> Self {
        Self {
            conveyor,
            sizes: Vec::new(),
        }
    }

    pub fn with_sizes(mut self, sizes: Vec<SizeSpec>) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn conveyor(&self) -> &Conveyor {
        &self.conveyor
    }

    pub fn conveyor_mut(&mut self) -> &mut Conveyor {
        &mut self.conveyor
    }

    pub fn sizes(&self) -> &[SizeSpec] {
        &self.sizes
    }

    /// Copy bound to a per-request category.
    pub fn scoped(&self, category: Option<&Category>) -> Self {
        Self {
            conveyor: self.conveyor.scoped(category),
            sizes: self.sizes.clone(),
        }
    }

    /// Upload `input` as `name`, or under its own full filename.
    pub async fn convey(&self, input: InboundFile, name: Option<&str>) -> ConveyResult<PutReceipt> {
        let source = input.resolve().await?;
        let name = name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| source.full_filename());
        self.conveyor
            .upload_raw(source.raw_bytes().clone(), Some(&name), Some(source.mime_type()))
            .await
    }

    /// Upload the original image, then its variants if sizes are configured.
    pub async fn convey_image_detailed(&self, input: InboundFile) -> ConveyResult<ImageConveyance> {
        let source = input.resolve().await?;
        let image = ImageConveyor::new(
            self.conveyor.clone(),
            ImageResizer::new(&source, self.sizes.clone()),
        );

        let original = image.upload(None, None, None).await?;
        let name = image.original().stored_name();
        let url = self.conveyor.url(&name);

        let variants = if self.sizes.is_empty() {
            VariantReport::default()
        } else {
            image.resize_and_upload_detailed().await
        };
        info!(
            name = %name,
            variants = variants.len(),
            failed = variants.failed().count(),
            "image conveyed"
        );

        Ok(ImageConveyance {
            name,
            url,
            original,
            variants,
        })
    }

    /// `true` when the original and every variant were stored.
    pub async fn convey_image(&self, input: InboundFile) -> bool {
        match self.convey_image_detailed(input).await {
            Ok(conveyance) => conveyance.success(),
            Err(err) => {
                warn!(error = %err, "image conveyance failed");
                false
            }
        }
    }
}
