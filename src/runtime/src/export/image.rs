use async_trait::async_trait;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::MirrorKind;
use modelmirror_core::model::{ImageRef, ModelAction, User};
use modelmirror_core::reference::{DistributionPackageName, PackageReference};

use super::{authorize_model, mirrored_model_id, ExportPlan, ExportSource};
use crate::archive::ArchiveUpload;
use crate::context::MirrorContext;
use crate::registry::relay_image_to_archive;

/// Exports one registry image: its manifest, config blob and layers.
pub struct ImageExport {
    model_id: String,
    image: ImageRef,
    name: Option<DistributionPackageName>,
}

impl ImageExport {
    pub fn new(model_id: impl Into<String>, image: ImageRef) -> Self {
        Self {
            model_id: model_id.into(),
            image,
            name: None,
        }
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }
}

#[async_trait]
impl ExportSource for ImageExport {
    async fn prepare(&mut self, ctx: &MirrorContext, user: &User) -> Result<ExportPlan> {
        let model = ctx.models.get_model(&self.model_id).await?;
        let mirrored_model_id = mirrored_model_id(&model)?;
        authorize_model(ctx, user, &model, ModelAction::View).await?;

        if self.image.repository != model.id {
            return Err(MirrorError::bad_request(format!(
                "Image '{}/{}' does not belong to model '{}'",
                self.image.repository, self.image.name, model.id
            )));
        }
        let name = DistributionPackageName::new(
            Some(ctx.config.registry.domain.clone()),
            format!("{}/{}", self.image.repository, self.image.name),
            PackageReference::Tag(self.image.tag.clone()),
        )?;

        let plan = ExportPlan {
            source_model_id: model.id.clone(),
            mirrored_model_id,
            kind: MirrorKind::Image {
                distribution_package_name: name.join(),
            },
        };
        self.name = Some(name);
        Ok(plan)
    }

    async fn write_content(
        &mut self,
        ctx: &MirrorContext,
        archive: &mut ArchiveUpload,
    ) -> Result<()> {
        let name = self
            .name
            .as_ref()
            .ok_or_else(|| MirrorError::Precondition("image export was not prepared".to_string()))?;
        let blobs = relay_image_to_archive(&ctx.registry, name, archive)
            .await
            .map_err(|e| {
                e.wrap(
                    "Error when adding image to export",
                    ErrorContext::new()
                        .with("modelId", &self.model_id)
                        .with("image", name),
                )
            })?;
        tracing::debug!(image = %name, blobs, "Added image");
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "image"
    }
}
