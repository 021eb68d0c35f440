use serde_json::json;

use super::*;
use crate::FallbackChannels;

#[test]
fn test_trending_push_shape_is_kept() {
    let rows = normalize_trending(Some(vec![json!({"item": "Drone", "frequency": 3})]));
    assert_eq!(
        rows,
        vec![TrendingItem {
            item: "Drone".to_string(),
            frequency: 3
        }]
    );
}

#[test]
fn test_trending_pull_shape_maps_request_count() {
    let rows = normalize_trending(Some(vec![
        json!({"item": "Kite", "requestCount": 7}),
        json!({"item": "Yo-yo", "count": 2}),
    ]));
    assert_eq!(rows[0].frequency, 7);
    assert_eq!(rows[1].item, "Yo-yo");
    assert_eq!(rows[1].frequency, 2);
}

#[test]
fn test_duplicates_pull_shape_maps_duplicate_count() {
    let rows = normalize_duplicates(Some(vec![
        json!({"childId": "c1", "item": "Kite", "count": 2}),
        json!({"childId": 42, "item": "Drone", "duplicateCount": 3}),
    ]));
    assert_eq!(
        rows,
        vec![
            DuplicateEntry {
                child_id: "c1".to_string(),
                item: "Kite".to_string(),
                count: 2
            },
            DuplicateEntry {
                child_id: "42".to_string(),
                item: "Drone".to_string(),
                count: 3
            },
        ]
    );
}

#[test]
fn test_inactive_pull_shape_maps_name_and_days() {
    let rows = normalize_inactive(Some(vec![
        json!({"childId": "c7", "childName": "Mia", "lastActivityDays": 12}),
        json!({"childId": "c8", "name": "Leo", "daysInactive": 4}),
    ]));
    assert_eq!(rows[0].name, "Mia");
    assert_eq!(rows[0].days_inactive, 12);
    assert_eq!(rows[1].name, "Leo");
    assert_eq!(rows[1].days_inactive, 4);
}

#[test]
fn test_entries_of_unknown_shape_are_dropped() {
    let rows = normalize_trending(Some(vec![
        json!({"name": "Drone"}),
        json!("Drone"),
        json!({"item": "Kite", "frequency": -1}),
        json!({"item": "Top", "frequency": 1}),
    ]));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item, "Top");
}

#[test]
fn test_missing_or_null_categories_default_to_empty() {
    let raw: RawSnapshot = serde_json::from_value(json!({"trendingItems": null})).unwrap();
    let snapshot = FallbackSnapshot::from_raw(raw, &FallbackChannels::default());
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.rows("wishlist-trending-1h").map(|r| r.len()), Some(0));
}

#[test]
fn test_snapshot_is_keyed_by_configured_channels() {
    let raw: RawSnapshot = serde_json::from_value(json!({
        "trendingItems": [{"item": "Drone", "requestCount": 5}],
        "duplicateEntries": [{"childId": "c1", "item": "Kite", "duplicateCount": 2}],
        "inactive": [{"childId": "c2", "childName": "Ava", "lastActivityDays": 9}],
    }))
    .unwrap();
    let names = FallbackChannels {
        trending: "t".to_string(),
        duplicates: "d".to_string(),
        inactive: "i".to_string(),
    };

    let snapshot = FallbackSnapshot::from_raw(raw, &names);

    assert_eq!(snapshot.rows("t").unwrap()[0], crate::test_utils::record(json!({"item": "Drone", "frequency": 5})));
    assert_eq!(
        snapshot.rows("d").unwrap()[0],
        crate::test_utils::record(json!({"childId": "c1", "item": "Kite", "count": 2}))
    );
    assert_eq!(
        snapshot.rows("i").unwrap()[0],
        crate::test_utils::record(json!({"childId": "c2", "name": "Ava", "daysInactive": 9}))
    );
    assert!(snapshot.rows("wishlist-trending-1h").is_none());
}
