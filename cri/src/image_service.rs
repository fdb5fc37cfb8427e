//! CRI ImageService implementation.
//!
//! Forwards image operations to the image delegate. `ImageFsInfo` is not
//! provided and always fails with `Unimplemented`.

use tonic::{Request, Response, Status};

use contivshim_core::ShimError;

use crate::cri_api::image_service_server::ImageService;
use crate::cri_api::*;
use crate::error::{delegate_failure, invalid_request, shim_error_to_status};
use crate::shim::Shim;

fn required_image(method: &str, image: Option<ImageSpec>) -> Result<ImageSpec, Status> {
    image.ok_or_else(|| invalid_request(method, "image spec required"))
}

#[tonic::async_trait]
impl ImageService for Shim {
    async fn list_images(
        &self,
        request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(filter = ?req.filter, "CRI ListImages");

        let images = ctx
            .run("ListImages", self.images.list_images(&ctx, req.filter))
            .await
            .map_err(|e| delegate_failure("ListImages", e))?;

        Ok(Response::new(ListImagesResponse { images }))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let image_spec = required_image("ImageStatus", req.image)?;

        tracing::debug!(image = %image_spec.image, verbose = req.verbose, "CRI ImageStatus");

        let resp = ctx
            .run(
                "ImageStatus",
                self.images.image_status(&ctx, image_spec, req.verbose),
            )
            .await
            .map_err(|e| delegate_failure("ImageStatus", e))?;

        Ok(Response::new(resp))
    }

    async fn pull_image(
        &self,
        request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let image_spec = required_image("PullImage", req.image)?;

        tracing::info!(image = %image_spec.image, "CRI PullImage");

        let image_ref = ctx
            .run(
                "PullImage",
                self.images
                    .pull_image(&ctx, image_spec, req.auth, req.sandbox_config),
            )
            .await
            .map_err(|e| delegate_failure("PullImage", e))?;

        tracing::info!(image_ref = %image_ref, "Image pulled");

        Ok(Response::new(PullImageResponse { image_ref }))
    }

    async fn remove_image(
        &self,
        request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let image_spec = required_image("RemoveImage", req.image)?;

        tracing::info!(image = %image_spec.image, "CRI RemoveImage");

        ctx.run("RemoveImage", self.images.remove_image(&ctx, image_spec))
            .await
            .map_err(|e| delegate_failure("RemoveImage", e))?;

        Ok(Response::new(RemoveImageResponse {}))
    }

    async fn image_fs_info(
        &self,
        _request: Request<ImageFsInfoRequest>,
    ) -> Result<Response<ImageFsInfoResponse>, Status> {
        tracing::debug!("CRI ImageFsInfo");
        Err(shim_error_to_status(ShimError::NotImplemented(
            "ImageFsInfo: not implemented".to_string(),
        )))
    }
}
