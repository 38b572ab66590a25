//! Integration test: relay images between mock registries and archives.
//!
//! An image is exported from one mock registry into an archive, then the
//! archive is imported into a second mock registry under the mirrored
//! model's repository.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modelmirror_core::config::MirrorConfig;
use modelmirror_core::memory::MemoryDeployment;
use modelmirror_core::metadata::{ImportResult, MirrorKind};
use modelmirror_core::model::{ImageRef, Model, ModelAction, ModelSettings, MirrorSettings, User};
use modelmirror_core::storage::MemoryObjectStore;
use modelmirror_runtime::export::{Exporter, ImageExport};
use modelmirror_runtime::import::import_archive;
use modelmirror_runtime::registry::{RegistryAuth, RegistryClient};
use modelmirror_runtime::MirrorContext;

const USER: &str = "CN=alice";
const MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

struct TestImage {
    manifest: Vec<u8>,
    config: (String, Vec<u8>),
    layer: (String, Vec<u8>),
}

fn digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn test_image() -> TestImage {
    let config = br#"{"architecture":"amd64","os":"linux"}"#.to_vec();
    let layer = vec![7u8; 5000];
    let config_digest = digest(&config);
    let layer_digest = digest(&layer);
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_TYPE,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest,
            "size": config.len()
        },
        "layers": [{
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": layer_digest,
            "size": layer.len()
        }]
    });
    TestImage {
        manifest: serde_json::to_vec(&manifest).unwrap(),
        config: (config_digest, config),
        layer: (layer_digest, layer),
    }
}

fn context(
    server: &MockServer,
    models: MemoryDeployment,
) -> (MirrorContext, Arc<MemoryObjectStore>) {
    let models = Arc::new(models);
    let objects = Arc::new(MemoryObjectStore::new());
    let registry = RegistryClient::with_auth(server.uri(), RegistryAuth::anonymous()).unwrap();
    let ctx = MirrorContext::new(MirrorConfig::default(), models.clone(), models, objects.clone())
        .unwrap()
        .with_registry(registry);
    (ctx, objects)
}

fn model(id: &str, mirror: MirrorSettings) -> Model {
    Model {
        id: id.to_string(),
        name: id.to_string(),
        card: None,
        settings: ModelSettings { mirror },
    }
}

async fn mount_source(server: &MockServer, image: &TestImage) {
    Mock::given(method("GET"))
        .and(path("/v2/src/app/manifests/v1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", MANIFEST_TYPE)
                .set_body_bytes(image.manifest.clone()),
        )
        .mount(server)
        .await;
    for (digest, content) in [&image.config, &image.layer] {
        Mock::given(method("GET"))
            .and(path(format!("/v2/src/app/blobs/{digest}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
            .mount(server)
            .await;
    }
}

async fn export_image(image: &TestImage) -> Bytes {
    let server = MockServer::start().await;
    mount_source(&server, image).await;

    let models = MemoryDeployment::new();
    models.insert_model(model(
        "src",
        MirrorSettings {
            source_model_id: None,
            destination_model_id: Some("dst".to_string()),
        },
    ));
    models.grant(USER, "src", &[ModelAction::View]);
    let (ctx, objects) = context(&server, models);

    let image_ref = ImageRef {
        repository: "src".to_string(),
        name: "app".to_string(),
        tag: "v1".to_string(),
    };
    let mut exporter = Exporter::new(
        ctx.clone(),
        User::new(USER),
        "image.tar.gz",
        ImageExport::new("src", image_ref),
    );
    exporter.init().await.unwrap();
    assert_eq!(
        exporter.metadata().map(|m| m.kind.clone()),
        Some(MirrorKind::Image {
            distribution_package_name: "localhost:5000/src/app:v1".to_string()
        })
    );
    exporter.add_data().await.unwrap();
    exporter.finalise().await.unwrap();

    objects.get(&ctx.config.export.bucket, "image.tar.gz").unwrap()
}

fn destination(server: &MockServer) -> MirrorContext {
    let models = MemoryDeployment::new();
    models.insert_model(model(
        "dst",
        MirrorSettings {
            source_model_id: Some("src".to_string()),
            destination_model_id: None,
        },
    ));
    models.grant(USER, "dst", &[ModelAction::Import]);
    context(server, models).0
}

fn stream_of(archive: Bytes) -> modelmirror_core::services::ByteStream {
    let chunks: Vec<std::io::Result<Bytes>> = archive
        .chunks(700)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_image_export_then_import() {
    let image = test_image();
    let archive = export_image(&image).await;

    let server = MockServer::start().await;
    // Config is already present, the layer is not
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/dst/app/blobs/{}", image.config.0)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/dst/app/blobs/{}", image.layer.0)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/dst/app/blobs/uploads/"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("location", "/v2/dst/app/blobs/uploads/session-1"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/dst/app/blobs/uploads/session-1"))
        .and(query_param("digest", image.layer.0.as_str()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/dst/app/manifests/v1"))
        .and(header("content-type", MANIFEST_TYPE))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = destination(&server);
    let information = import_archive(&ctx, &User::new(USER), stream_of(archive))
        .await
        .unwrap();

    assert_eq!(
        information.result,
        ImportResult::Image {
            image_id: "localhost:5000/dst/app:v1".to_string()
        }
    );
}

#[tokio::test]
async fn test_existing_blobs_are_drained_not_uploaded() {
    let image = test_image();
    let archive = export_image(&image).await;

    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/dst/app/manifests/v1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = destination(&server);
    let information = import_archive(&ctx, &User::new(USER), stream_of(archive))
        .await
        .unwrap();
    assert!(matches!(information.result, ImportResult::Image { .. }));
}

#[tokio::test]
async fn test_export_fails_on_blob_digest_mismatch() {
    let image = test_image();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/src/app/manifests/v1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", MANIFEST_TYPE)
                .set_body_bytes(image.manifest.clone()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/src/app/blobs/{}", image.config.0)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image.config.1.clone()))
        .mount(&server)
        .await;
    let mut tampered = image.layer.1.clone();
    tampered[0] = 8;
    Mock::given(method("GET"))
        .and(path(format!("/v2/src/app/blobs/{}", image.layer.0)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tampered))
        .mount(&server)
        .await;

    let models = MemoryDeployment::new();
    models.insert_model(model(
        "src",
        MirrorSettings {
            source_model_id: None,
            destination_model_id: Some("dst".to_string()),
        },
    ));
    models.grant(USER, "src", &[ModelAction::View]);
    let (ctx, objects) = context(&server, models);

    let image_ref = ImageRef {
        repository: "src".to_string(),
        name: "app".to_string(),
        tag: "v1".to_string(),
    };
    let result = Exporter::new(
        ctx.clone(),
        User::new(USER),
        "bad.tar.gz",
        ImageExport::new("src", image_ref),
    )
    .run()
        .await;

    assert!(result.is_err());
    assert!(objects.get(&ctx.config.export.bucket, "bad.tar.gz").is_none());
}

#[tokio::test]
async fn test_image_export_rejects_foreign_repository() {
    let server = MockServer::start().await;
    let models = MemoryDeployment::new();
    models.insert_model(model(
        "src",
        MirrorSettings {
            source_model_id: None,
            destination_model_id: Some("dst".to_string()),
        },
    ));
    models.grant(USER, "src", &[ModelAction::View]);
    let (ctx, objects) = context(&server, models);

    let image_ref = ImageRef {
        repository: "other".to_string(),
        name: "app".to_string(),
        tag: "v1".to_string(),
    };
    let error = Exporter::new(
        ctx,
        User::new(USER),
        "foreign.tar.gz",
        ImageExport::new("src", image_ref),
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(error.status_code(), 400);
    assert_eq!(objects.put_attempts(), 0);
}
