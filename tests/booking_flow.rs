use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tablewise::calendar::{DayRule, WeekDay};
use tablewise::capability::{Capabilities, InMemoryCatalog, InMemoryIdentity, ManualClock};
use tablewise::config::Config;
use tablewise::engine::{Engine, EngineError};
use tablewise::model::*;
use ulid::Ulid;

const H: Ms = 3_600_000;
/// 2024-01-05T00:00:00Z, a Friday.
const FRI: Ms = 1_704_412_800_000;

fn test_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablewise_test_flow").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config_for(dir: &Path) -> Config {
    let env: HashMap<&str, String> = [
        ("TABLEWISE_DATA_DIR", dir.display().to_string()),
        ("TABLEWISE_COMPACT_THRESHOLD", "1000000".to_string()),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| env.get(key).cloned())
}

struct Venue {
    engine: Arc<Engine>,
    catalog: Arc<InMemoryCatalog>,
    identity: Arc<InMemoryIdentity>,
    caps: Capabilities,
    tables: Vec<Ulid>,
}

/// A venue open Friday 17:00 through Saturday 02:00 with `n` tables.
async fn venue(config: &Config, n: usize) -> Venue {
    let catalog = Arc::new(InMemoryCatalog::new());
    let identity = Arc::new(InMemoryIdentity::new());
    let caps = Capabilities {
        catalog: catalog.clone(),
        identity: identity.clone(),
        clock: Arc::new(ManualClock::new(FRI)),
    };
    let engine = tablewise::bootstrap(config, caps.clone()).await.unwrap();

    let calendar_id = engine
        .define_calendar(vec![
            DayRule::open(WeekDay::Fri, 61_200, 86_400),
            DayRule::open(WeekDay::Sat, 1, 7_200),
        ])
        .await
        .unwrap();
    let tables = (0..n)
        .map(|i| {
            let id = Ulid::new();
            catalog.upsert(Resource { id, label: Some(format!("T{i}")), active: true, calendar_id });
            id
        })
        .collect();
    Venue { engine, catalog, identity, caps, tables }
}

impl Venue {
    fn guest(&self) -> Ulid {
        let id = Ulid::new();
        self.identity.add_user(id);
        id
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn friday_rush_is_overlap_free_and_durable() {
    let dir = test_data_dir("friday_rush");
    let config = config_for(&dir);
    let venue = venue(&config, 4).await;

    // Every guest wants 20:00-22:00 on some table; each table admits one.
    let attempts: Vec<_> = (0..40)
        .map(|i| {
            let engine = venue.engine.clone();
            let req = NewReservation {
                user_id: venue.guest(),
                resource_id: venue.tables[i % venue.tables.len()],
                start_at: FRI + 20 * H,
                end_at: FRI + 22 * H,
                party_size: 2,
                is_party: false,
            };
            tokio::spawn(async move { engine.create_reservation(req).await })
        })
        .collect();
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let admitted: Vec<Reservation> = results.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
    assert_eq!(admitted.len(), venue.tables.len());
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(e, EngineError::OverlapConflict { .. })));

    // Late booking spills past midnight into Saturday's hours.
    let late = venue
        .engine
        .create_reservation(NewReservation {
            user_id: venue.guest(),
            resource_id: venue.tables[0],
            start_at: FRI + 23 * H,
            end_at: FRI + 25 * H,
            party_size: 6,
            is_party: true,
        })
        .await
        .unwrap();

    // Past Saturday 02:00 is closed.
    let too_late = venue
        .engine
        .create_reservation(NewReservation {
            user_id: venue.guest(),
            resource_id: venue.tables[1],
            start_at: FRI + 25 * H,
            end_at: FRI + 27 * H,
            party_size: 2,
            is_party: false,
        })
        .await;
    match too_late {
        Err(EngineError::ResourceClosedAtRequestedTime { uncovered, .. }) => {
            assert_eq!(uncovered, vec![Span::new(FRI + 26 * H, FRI + 27 * H)]);
        }
        other => panic!("expected closed, got {other:?}"),
    }

    venue.engine.compact_wal().await.unwrap();

    let reopened = Engine::open(config.engine_settings(), venue.caps.clone()).await.unwrap();
    for r in admitted.iter().chain(std::iter::once(&late)) {
        assert_eq!(reopened.get_reservation(r.id).as_ref(), Some(r));
    }
    let windows = reopened.open_windows(venue.tables[0], FRI, FRI + 48 * H).await.unwrap();
    assert_eq!(
        windows,
        vec![
            Span::new(FRI + 17 * H, FRI + 20 * H),
            Span::new(FRI + 22 * H, FRI + 23 * H),
            Span::new(FRI + 25 * H, FRI + 26 * H),
        ]
    );
}

#[tokio::test]
async fn retired_table_blocks_new_bookings_but_keeps_history() {
    let dir = test_data_dir("retired_table");
    let config = config_for(&dir);
    let venue = venue(&config, 1).await;
    let table = venue.tables[0];
    let guest = venue.guest();

    let r = venue
        .engine
        .create_reservation(NewReservation {
            user_id: guest,
            resource_id: table,
            start_at: FRI + 18 * H,
            end_at: FRI + 19 * H,
            party_size: 3,
            is_party: false,
        })
        .await
        .unwrap();

    venue.catalog.set_active(table, false);
    let blocked = venue
        .engine
        .create_reservation(NewReservation {
            user_id: venue.guest(),
            resource_id: table,
            start_at: FRI + 20 * H,
            end_at: FRI + 21 * H,
            party_size: 2,
            is_party: false,
        })
        .await;
    assert!(matches!(blocked, Err(EngineError::ResourceUnavailable(id)) if id == table));

    let cancelled = venue.engine.cancel_reservation(r.id, "table retired").await.unwrap();
    assert_eq!(cancelled.cancel_reason(), Some("table retired"));
    let history = venue.engine.list_reservations(&ReservationFilter {
        resource_id: Some(table),
        ..Default::default()
    });
    assert_eq!(history, vec![cancelled]);
}
