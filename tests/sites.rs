#![allow(missing_docs)]

use tallystore::sites::{Coordinate, Site, SiteStore};
use tallystore::{InMemoryStore, KeySchema};

fn site(id: u64) -> Site {
    Site {
        id,
        capacity: 4.5 + id as f64,
        panels: 3,
        address: format!("{} Elm St", id),
        city: "Oakland".into(),
        state: "CA".into(),
        postal_code: "94601".into(),
        coordinate: Some(Coordinate { lat: 37.78, lng: -122.22 }),
    }
}

#[tokio::test]
async fn insert_then_find() {
    let sites = SiteStore::new(InMemoryStore::new());
    sites.insert(&site(4)).await.unwrap();
    assert_eq!(sites.find_by_id(4).await.unwrap(), Some(site(4)));
    assert_eq!(sites.find_by_id(5).await.unwrap(), None);
}

#[tokio::test]
async fn find_all_lists_every_site_once() {
    let sites = SiteStore::new(InMemoryStore::new());
    for id in [3, 1, 2] {
        sites.insert(&site(id)).await.unwrap();
    }
    sites.insert(&site(2)).await.unwrap();

    let all = sites.find_all().await.unwrap();
    assert_eq!(all, vec![site(1), site(2), site(3)]);
}

#[tokio::test]
async fn schemas_isolate_deployments() {
    let store = InMemoryStore::new();
    let a = SiteStore::new(store.clone()).with_schema(KeySchema::new("a").unwrap());
    let b = SiteStore::new(store.clone()).with_schema(KeySchema::new("b").unwrap());
    a.insert(&site(1)).await.unwrap();
    assert!(b.find_all().await.unwrap().is_empty());
    assert_eq!(a.find_all().await.unwrap().len(), 1);
}
