//! Tests for the resource table on its own, without a tape.

mod common;

use bobbin_core::ResourceRole;
use bobbin_runtime::{InvocationError, ResourceTable, RuntimeError, SetupError};
use common::*;
use std::sync::Arc;

async fn table() -> ResourceTable {
    let runtime = runtime().await;
    ResourceTable::new(
        Arc::clone(runtime.device()),
        Arc::clone(runtime.queue()),
        f32::INFINITY,
    )
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_write_then_read_scratch() {
    let mut table = table().await;

    let id = table
        .create(308, ResourceRole::Scratch)
        .expect("Create should succeed");
    let data = f32_bytes(&(0..77).map(|i| i as f32).collect::<Vec<_>>());
    table.write(id, &data).expect("Write should succeed");

    let read = table.read(id).await.expect("Read should succeed");
    assert_eq!(read, data);
    assert_eq!(table.byte_size(id), Some(308));
    assert_eq!(table.role(id), Some(ResourceRole::Scratch));
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_unaligned_size_round_trips_exact_bytes() {
    let mut table = table().await;

    let id = table.create(6, ResourceRole::Io).expect("Create should succeed");
    table
        .write(id, &[1, 2, 3, 4, 5, 6])
        .expect("Write should succeed");

    // Padding is internal; only the declared bytes come back
    let read = table.read(id).await.expect("Read should succeed");
    assert_eq!(read, vec![1, 2, 3, 4, 5, 6]);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_weights_are_read_only() {
    let mut table = table().await;

    let data = f32_bytes(&[1.5, -2.5, 3.5, -4.5]);
    let id = table
        .create_weight(16, &data)
        .expect("Create weight should succeed");

    let err = table.write(id, &[0; 16]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Invocation(InvocationError::ReadOnly(_))
    ));

    let read = table.read(id).await.expect("Read should succeed");
    assert_eq!(read, data);
    assert_eq!(table.total_bytes(ResourceRole::Weight), 16);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_invalid_creation_is_rejected() {
    let mut table = table().await;

    let err = table.create(0, ResourceRole::Scratch).unwrap_err();
    assert!(matches!(err, RuntimeError::Setup(SetupError::ZeroSize(_))));

    let err = table.create(16, ResourceRole::Weight).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Setup(SetupError::WeightWithoutData)
    ));

    let err = table.create_weight(16, &[0; 12]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Setup(SetupError::WeightSize {
            expected: 16,
            found: 12,
            ..
        })
    ));

    let max_buffer = runtime().await.device().limits().max_buffer_size;
    let too_big = u64::from(max_buffer) + 4;
    let err = table.create(too_big, ResourceRole::Scratch).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Setup(SetupError::DeviceLimit {
            limit: "max_buffer_size",
            ..
        })
    ));

    assert!(table.is_empty());
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_wrong_write_size_leaves_buffer_untouched() {
    let mut table = table().await;

    let id = table.create(16, ResourceRole::Io).expect("Create should succeed");
    let data = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    table.write(id, &data).expect("Write should succeed");

    let err = table.write(id, &[0; 12]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Invocation(InvocationError::InputSize {
            expected: 16,
            found: 12,
            ..
        })
    ));

    let read = table.read(id).await.expect("Read should succeed");
    assert_eq!(read, data);
}
