//! Stemcells are container images already present in a registry, so nothing
//! is uploaded: the image reference in the cloud properties becomes the
//! stemcell id.

use crate::cpi::StemcellCid;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemcellCloudProperties {
    #[serde(default)]
    pub image: String,
}

pub async fn create_stemcell(
    image_path: String,
    cloud_properties: StemcellCloudProperties,
) -> Result<StemcellCid> {
    debug!(
        "Using image {} for stemcell tarball {}",
        cloud_properties.image, image_path
    );
    Ok(cloud_properties.image)
}

pub async fn delete_stemcell(_stemcell: StemcellCid) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_stemcell_returns_image() {
        let cid = create_stemcell(
            "/tmp/stemcell.tgz".to_string(),
            StemcellCloudProperties {
                image: "registry.example.com/stemcell:3312".to_string(),
            },
        )
        .await
        .expect("create_stemcell should succeed");

        assert_eq!(cid, "registry.example.com/stemcell:3312");
    }

    #[tokio::test]
    async fn test_delete_stemcell_is_noop() {
        delete_stemcell("anything".to_string())
            .await
            .expect("delete_stemcell should succeed");
    }
}
