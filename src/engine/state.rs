use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::calendar::AvailabilityCalendar;
use crate::lifecycle::ReservationStatus;
use crate::model::*;

use super::index::{IntervalOverlapIndex, ResourceSlots};

pub type SharedUserSlot = Arc<Mutex<UserSlot>>;

/// Per-user record of the single active reservation a user may hold.
#[derive(Debug, Default)]
pub struct UserSlot {
    pub active: Option<Ulid>,
}

/// In-memory state rebuilt from the WAL.
#[derive(Default)]
pub struct EngineState {
    pub calendars: DashMap<Ulid, Arc<AvailabilityCalendar>>,
    pub reservations: DashMap<Ulid, Reservation>,
    pub index: IntervalOverlapIndex,
    pub users: DashMap<Ulid, SharedUserSlot>,
    /// Commits hold this shared; compaction takes it exclusively so its
    /// snapshot never misses an event that reached the log.
    pub commit_gate: RwLock<()>,
}

impl EngineState {
    pub fn user_slot(&self, user_id: Ulid) -> SharedUserSlot {
        self.users.entry(user_id).or_default().value().clone()
    }

    /// Apply an event. The caller holds the user and resource locks the
    /// event touches and passes the guarded values in.
    pub fn apply(
        &self,
        event: &Event,
        user: Option<&mut UserSlot>,
        slots: Option<&mut ResourceSlots>,
    ) {
        match event {
            Event::CalendarDefined { id, rules } => {
                match AvailabilityCalendar::build(rules.iter().copied()) {
                    Ok(calendar) => {
                        self.calendars.insert(*id, Arc::new(calendar));
                    }
                    Err(e) => warn!("skipping invalid calendar {id} in log: {e}"),
                }
            }
            Event::CalendarRemoved { id } => {
                self.calendars.remove(id);
            }
            Event::ReservationCreated { reservation } => {
                if reservation.is_active() {
                    if let Some(slots) = slots {
                        slots.insert(reservation.id, reservation.span());
                    }
                    if let Some(user) = user {
                        user.active = Some(reservation.id);
                    }
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationCancelled { id, reason, at, .. } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.status = ReservationStatus::Cancelled { reason: reason.clone() };
                    r.updated_at = *at;
                }
                if let Some(slots) = slots {
                    slots.remove(*id);
                }
                if let Some(user) = user
                    && user.active == Some(*id) {
                        user.active = None;
                    }
            }
            Event::ReservationAmended { id, party_size, is_party, at, .. } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.party_size = *party_size;
                    r.is_party = *is_party;
                    r.updated_at = *at;
                }
            }
        }
    }

    /// Acquire whatever locks `event` needs and apply it. Used for replay,
    /// where nothing else contends.
    pub async fn apply_locked(&self, event: &Event) {
        let mut user = match event.user_id() {
            Some(uid) => Some(self.user_slot(uid).lock_owned().await),
            None => None,
        };
        let mut slots = match event.resource_id() {
            Some(rid) => Some(self.index.lock(rid).await),
            None => None,
        };
        self.apply(event, user.as_deref_mut(), slots.as_deref_mut());
    }

    /// The minimal event list that recreates the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut calendars: Vec<(Ulid, Arc<AvailabilityCalendar>)> = self
            .calendars
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        calendars.sort_by_key(|(id, _)| *id);

        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));

        let mut events = Vec::with_capacity(calendars.len() + reservations.len());
        events.extend(
            calendars
                .into_iter()
                .map(|(id, cal)| Event::CalendarDefined { id, rules: cal.rules() }),
        );
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{DayRule, TimeOfDayRange, WeekDay};

    fn reservation(resource_id: Ulid, user_id: Ulid, start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id,
            user_id,
            start_at: start,
            end_at: end,
            party_size: 2,
            is_party: false,
            status: ReservationStatus::Active,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn create_then_cancel_updates_all_views() {
        let state = EngineState::default();
        let (rid, uid) = (Ulid::new(), Ulid::new());
        let r = reservation(rid, uid, 100, 200);

        state
            .apply_locked(&Event::ReservationCreated { reservation: r.clone() })
            .await;
        assert_eq!(state.user_slot(uid).lock().await.active, Some(r.id));
        assert!(state.index.would_overlap(rid, &Span::new(150, 160)).await);

        state
            .apply_locked(&Event::ReservationCancelled {
                id: r.id,
                resource_id: rid,
                user_id: uid,
                reason: "sick".into(),
                at: 5,
            })
            .await;
        assert_eq!(state.user_slot(uid).lock().await.active, None);
        assert!(!state.index.would_overlap(rid, &Span::new(150, 160)).await);
        let stored = state.reservations.get(&r.id).unwrap().clone();
        assert_eq!(stored.cancel_reason(), Some("sick"));
        assert_eq!(stored.updated_at, 5);
    }

    #[tokio::test]
    async fn cancelled_record_does_not_occupy() {
        let state = EngineState::default();
        let (rid, uid) = (Ulid::new(), Ulid::new());
        let mut r = reservation(rid, uid, 100, 200);
        r.status = ReservationStatus::Cancelled { reason: "moved".into() };

        state
            .apply_locked(&Event::ReservationCreated { reservation: r.clone() })
            .await;
        assert!(state.reservations.contains_key(&r.id));
        assert_eq!(state.user_slot(uid).lock().await.active, None);
        assert!(state.index.active_spans(rid).await.is_empty());
    }

    #[tokio::test]
    async fn stale_cancel_leaves_newer_active_slot() {
        let state = EngineState::default();
        let uid = Ulid::new();
        let older = reservation(Ulid::new(), uid, 100, 200);
        let newer = reservation(Ulid::new(), uid, 300, 400);
        state.apply_locked(&Event::ReservationCreated { reservation: older.clone() }).await;
        state.apply_locked(&Event::ReservationCreated { reservation: newer.clone() }).await;
        state
            .apply_locked(&Event::ReservationCancelled {
                id: older.id,
                resource_id: older.resource_id,
                user_id: uid,
                reason: "x".into(),
                at: 2,
            })
            .await;
        assert_eq!(state.user_slot(uid).lock().await.active, Some(newer.id));
    }

    #[tokio::test]
    async fn invalid_logged_calendar_is_skipped() {
        let state = EngineState::default();
        let id = Ulid::new();
        state
            .apply_locked(&Event::CalendarDefined {
                id,
                rules: vec![DayRule {
                    weekday: WeekDay::Mon,
                    enabled: true,
                    range: TimeOfDayRange::new(500, 100),
                }],
            })
            .await;
        assert!(!state.calendars.contains_key(&id));
    }

    #[tokio::test]
    async fn snapshot_reproduces_state() {
        let state = EngineState::default();
        let cal_id = Ulid::new();
        let rules = vec![DayRule::open(WeekDay::Sat, 1, 86_400)];
        state
            .apply_locked(&Event::CalendarDefined { id: cal_id, rules: rules.clone() })
            .await;
        let uid = Ulid::new();
        let r = reservation(Ulid::new(), uid, 100, 200);
        state.apply_locked(&Event::ReservationCreated { reservation: r.clone() }).await;
        state
            .apply_locked(&Event::ReservationAmended {
                id: r.id,
                resource_id: r.resource_id,
                party_size: 6,
                is_party: true,
                at: 9,
            })
            .await;

        let rebuilt = EngineState::default();
        for event in state.snapshot_events() {
            rebuilt.apply_locked(&event).await;
        }
        assert_eq!(rebuilt.calendars.get(&cal_id).unwrap().rules(), rules);
        let stored = rebuilt.reservations.get(&r.id).unwrap().clone();
        assert_eq!(stored.party_size, 6);
        assert!(stored.is_party);
        assert_eq!(rebuilt.user_slot(uid).lock().await.active, Some(r.id));
        assert_eq!(rebuilt.index.active_spans(r.resource_id).await, vec![r.span()]);
    }
}
