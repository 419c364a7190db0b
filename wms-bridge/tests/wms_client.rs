use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wms_bridge::http::HttpSettings;
use wms_bridge::wms::{WmsClient, WmsClientConfig};
use wms_bridge_core::contract::{BlobStore, CompletedItemSource, MappedEntity, TargetWriter};
use wms_bridge_core::entity::{EntityKey, EntityKind, Scope, UploadFlow};

fn client(server: &MockServer) -> WmsClient {
    WmsClient::new(WmsClientConfig {
        base_url: server.uri(),
        api_key: "wms-test-key".to_string(),
        http: HttpSettings {
            timeout_secs: 5,
            max_retries: 0,
        },
    })
    .expect("client")
}

fn customer() -> MappedEntity {
    MappedEntity {
        key: EntityKey::from_parts(["C1"]).unwrap(),
        payload: json!({ "customer_number": "C1", "name": "Acme" }),
    }
}

#[tokio::test]
async fn existing_entity_is_updated_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2001/customers/C1"))
        .and(header("x-api-key", "wms-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "customer_number": "C1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/2001/customers/C1"))
        .and(body_json(json!({ "customer_number": "C1", "name": "Acme" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    client(&server)
        .upsert(&Scope::new("2001"), EntityKind::Customer, &customer())
        .await
        .expect("upsert");
}

#[tokio::test]
async fn missing_entity_is_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2001/customers/C1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2001/customers"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upsert(&Scope::new("2001"), EntityKind::Customer, &customer())
        .await
        .expect("upsert");
}

#[tokio::test]
async fn rejected_write_surfaces_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2001/customers/C1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2001/customers"))
        .respond_with(ResponseTemplate::new(422).set_body_string("country unknown"))
        .mount(&server)
        .await;

    let err = client(&server)
        .upsert(&Scope::new("2001"), EntityKind::Customer, &customer())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("country unknown"));
}

#[tokio::test]
async fn batch_default_reports_each_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let other = MappedEntity {
        key: EntityKey::from_parts(["C2"]).unwrap(),
        payload: json!({ "customer_number": "C2", "name": "Globex" }),
    };
    let results = client(&server)
        .upsert_batch(&Scope::new("2001"), EntityKind::Customer, &[customer(), other])
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn completed_shipments_are_polled_and_marked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2001/shipments"))
        .and(query_param("status", "completed"))
        .and(query_param("processed", "false"))
        .and(query_param("completed_since", "2024-04-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "shipment_id": "S-1",
                "order_reference": 5001,
                "completed_at": "2024-04-02T10:00:00Z",
                "products": [{ "sku": "SKU-1", "quantity": 3 }]
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2001/shipments/S-1/processed"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let wms = client(&server);
    let scope = Scope::new("2001");
    let items = wms
        .poll_completed(
            &scope,
            UploadFlow::Shipments,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
        .await
        .expect("poll");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "S-1");
    assert_eq!(
        items[0].completed_at,
        Some(Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap())
    );
    assert_eq!(items[0].record.lines("products").len(), 1);

    wms.mark_processed(&scope, UploadFlow::Shipments, "S-1")
        .await
        .expect("mark");
}

#[tokio::test]
async fn blobs_are_stored_under_their_hash() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/2001/images/abc123"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": "https://cdn.example.com/abc123.png" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = client(&server)
        .put_blob(&Scope::new("2001"), "abc123", b"\x89PNG")
        .await
        .expect("put");

    assert_eq!(url, "https://cdn.example.com/abc123.png");
}
