// # HTTP Store Real Environment Validation Tool
//
// Checks the HTTP store against a real collection endpoint: that it lists,
// that every record parses, and (in live mode) that a create/update/delete
// round trip works.
//
// ## Usage
//
// ```bash
// # Dry-run mode (default - safe, GET requests only)
// PAIRSYNC_MODE=dry-run \
// PAIRSYNC_SECONDARY_URL=https://api.example.com/crm/deals \
// PAIRSYNC_SECONDARY_API_TOKEN=your_token \
// cargo run --bin http_validation
//
// # Live mode (creates, edits and deletes one scratch record!)
// PAIRSYNC_MODE=live \
// PAIRSYNC_SECONDARY_URL=https://api.example.com/crm/deals \
// PAIRSYNC_SECONDARY_API_TOKEN=your_token \
// cargo run --bin http_validation
// ```
//
// ## Environment Variables
//
// Required:
// - `PAIRSYNC_SECONDARY_URL`: Collection endpoint
//
// Optional:
// - `PAIRSYNC_SECONDARY_API_TOKEN`: Bearer token
// - `PAIRSYNC_SECONDARY_ID_FIELD`: Id field (default: id)
// - `PAIRSYNC_SECONDARY_UPDATED_AT_FIELD`: Modification time field (default: updatedAt)
// - `PAIRSYNC_MODE`: "dry-run" or "live" (default: dry-run)

use pairsync_core::traits::{Document, Store};
use pairsync_service_http::HttpService;
use serde_json::json;
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("=== HTTP Store Real Environment Validation ===");

    let Ok(base_url) = env::var("PAIRSYNC_SECONDARY_URL") else {
        tracing::error!("PAIRSYNC_SECONDARY_URL environment variable is required");
        return ExitCode::FAILURE;
    };
    let api_token = env::var("PAIRSYNC_SECONDARY_API_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    let id_field = env::var("PAIRSYNC_SECONDARY_ID_FIELD").unwrap_or_else(|_| "id".to_string());
    let updated_at_field =
        env::var("PAIRSYNC_SECONDARY_UPDATED_AT_FIELD").unwrap_or_else(|_| "updatedAt".to_string());

    let mode = env::var("PAIRSYNC_MODE").unwrap_or_else(|_| "dry-run".to_string());
    let dry_run = !mode.eq_ignore_ascii_case("live");

    if dry_run {
        tracing::warn!("Running in DRY-RUN mode - no changes will be made");
    } else {
        tracing::warn!("Running in LIVE mode - will create and delete a scratch record!");
    }

    tracing::info!("Configuration:");
    tracing::info!("  Endpoint: {}", base_url);
    tracing::info!("  Fields: id='{}', updated_at='{}'", id_field, updated_at_field);
    tracing::info!("  Token: {}", if api_token.is_some() { "set (not shown)" } else { "none" });
    tracing::info!("  Mode: {}", mode);

    tracing::info!("\n--- Step 1: Creating HTTP Store ---");
    let store = match HttpService::new("validation", base_url, api_token, dry_run) {
        Ok(store) => store.with_fields(id_field, updated_at_field),
        Err(e) => {
            tracing::error!("✗ Store creation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Store created: {:?}", store);

    tracing::info!("\n--- Step 2: Listing Collection ---");
    let before = match store.list().await {
        Ok(records) => {
            tracing::info!("✓ Listed {} record(s)", records.len());
            for record in records.iter().take(5) {
                tracing::info!("  {} @ {}", record.id, record.updated_at);
            }
            records.len()
        }
        Err(e) => {
            tracing::error!("✗ List failed: {}", e);
            tracing::error!("Error details: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    if dry_run {
        tracing::info!("\n=== DRY-RUN COMPLETE ===");
        tracing::info!("No changes were made to the collection.");
        tracing::info!("To test writes, set PAIRSYNC_MODE=live");
        return ExitCode::SUCCESS;
    }

    tracing::info!("\n--- Step 3: Create / Update / Delete Round Trip ---");
    let scratch: Document = json!({ "name": "pairsync validation record" })
        .as_object()
        .cloned()
        .unwrap_or_default();

    let id = match store.create(&scratch).await {
        Ok(id) => {
            tracing::info!("✓ Created scratch record {}", id);
            id
        }
        Err(e) => {
            tracing::error!("✗ Create failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut edited = scratch.clone();
    edited.insert("name".to_string(), json!("pairsync validation record (edited)"));
    if let Err(e) = store.update(&id, &edited).await {
        tracing::error!("✗ Update failed: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!("✓ Updated scratch record");

    if let Err(e) = store.delete(&id).await {
        tracing::error!("✗ Delete failed: {}", e);
        tracing::error!("Remove record {} by hand", id);
        return ExitCode::FAILURE;
    }
    tracing::info!("✓ Deleted scratch record");

    // Deleting twice must succeed
    if let Err(e) = store.delete(&id).await {
        tracing::error!("✗ Repeated delete failed: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!("✓ Repeated delete is a no-op");

    match store.list().await {
        Ok(records) if records.len() == before => tracing::info!("✓ Collection size restored"),
        Ok(records) => tracing::warn!(
            "⚠ Collection size changed during validation: {} -> {}",
            before,
            records.len()
        ),
        Err(e) => tracing::warn!("⚠ Final list failed: {}", e),
    }

    tracing::info!("\n=== LIVE MODE COMPLETE ===");
    ExitCode::SUCCESS
}
