use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::*;
use crate::dispatch::BanAction;
use crate::event::{EventBus, Interest, Payload, SteamId, Team};
use crate::notify::Notification;
use crate::rcon::testing::RecordingControl;
use crate::store::testing::MemoryStore;
use crate::store::FilterRecord;

const PLAYER: SteamId = SteamId(76561198017946808);

struct Fixture {
    engine: WarningEngine,
    store: Arc<MemoryStore>,
    control: Arc<RecordingControl>,
    notifications: mpsc::Receiver<Notification>,
    pool: WorkerPool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

fn fixture(limit: usize, action: BanAction) -> Fixture {
    fixture_with(limit, action, Some(Duration::weeks(1)), 32)
}

fn fixture_with(
    limit: usize,
    action: BanAction,
    exceeded_duration: Option<Duration>,
    pool_capacity: usize,
) -> Fixture {
    let filters = vec![FilterRecord {
        filter_id: 7,
        pattern: "badword".into(),
        is_regex: false,
        is_enabled: true,
        trigger_count: 0,
    }];
    let store = Arc::new(MemoryStore::with_filters(filters.clone()));
    let control = Arc::new(RecordingControl::default());
    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();
    let pool = WorkerPool::spawn(1, pool_capacity, cancel.clone(), &tasks);
    let (sink, notifications) = NotificationSink::new(32);
    let timeout = StdDuration::from_secs(1);

    let settings = WarningSettings {
        limit,
        timeout: Duration::hours(1),
        sweep_interval: StdDuration::from_secs(1),
        exceeded_action: action,
        exceeded_duration,
        authority: SteamId(76561197960265729),
        external_url: "https://example.com".into(),
        call_timeout: timeout,
    };
    let effects = WarningEffects {
        store: store.clone(),
        control: control.clone(),
        dispatcher: Arc::new(Dispatcher::new(store.clone(), control.clone(), timeout)),
        pool: pool.clone(),
        sink,
    };

    Fixture {
        engine: WarningEngine::new(FilterSet::from_records(filters), settings, effects),
        store,
        control,
        notifications,
        pool,
        cancel,
        tasks,
    }
}

fn say(steam_id: SteamId, message: &str) -> Envelope {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
    Envelope::new(EventKind::Say, ServerRef::new(1, "eu-1"), at)
        .with_actor(PlayerRef {
            steam_id,
            name: "Player".into(),
            team: Team::Red,
            address: None,
        })
        .with_payload(Payload::Say { message: message.into() })
}

/// Poll until `check` holds; pool jobs run on another task
async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(StdDuration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn embed_title(n: &Notification) -> &str {
    &n.embed.title
}

#[tokio::test]
async fn test_third_offense_escalates_to_ban() {
    let mut f = fixture(2, BanAction::Ban);
    let now = Utc::now();

    assert_eq!(
        f.engine.handle(&say(PLAYER, "you badword"), now),
        Some(WarnOutcome::Warned { count: 1 })
    );
    assert_eq!(
        f.engine.handle(&say(PLAYER, "badword again"), now),
        Some(WarnOutcome::Warned { count: 2 })
    );
    match f.engine.handle(&say(PLAYER, "BADWORD!!"), now) {
        Some(WarnOutcome::Escalated { warnings }) => assert_eq!(warnings.len(), 3),
        other => panic!("expected escalation, got {:?}", other),
    }
    assert!(!f.engine.tracker().is_tracked(PLAYER));

    let store = f.store.clone();
    eventually(|| store.bans.lock().len() == 1).await;
    let ban = store.bans.lock()[0].clone();
    assert_eq!(ban.steam_id, PLAYER);
    assert_eq!(ban.action, BanAction::Ban);
    assert_eq!(ban.valid_until, Some(now + Duration::weeks(1)));

    eventually(|| store.trigger_count(7) == 3).await;

    let control = f.control.clone();
    eventually(|| control.commands().len() == 3).await;
    let commands = control.commands();
    assert!(commands[0].1.starts_with("sm_psay \"#[U:1:57681080]\" \"[WARN #1]"));
    assert!(commands[1].1.starts_with("sm_psay \"#[U:1:57681080]\" \"[WARN #2]"));
    assert!(commands[2].1.starts_with("sm_kick"));

    let titles: Vec<String> = (0..3)
        .map(|_| embed_title(&f.notifications.try_recv().unwrap()).to_string())
        .collect();
    assert_eq!(
        titles,
        ["Language Warning (#1/2)", "Language Warning (#2/2)", "Language Warning (#3/2)"]
    );

    f.cancel.cancel();
    f.tasks.close();
    f.tasks.wait().await;
}

#[tokio::test]
async fn test_escalation_notice_has_expiry() {
    let mut f = fixture(0, BanAction::Gag);
    f.engine.handle(&say(PLAYER, "badword"), Utc::now());

    let notice = f.notifications.try_recv().unwrap();
    assert_eq!(notice.channel, Channel::ModLog);
    let embed = notice.embed;
    let names: Vec<&str> = embed.fields.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"Name"));
    assert!(names.contains(&"Expires In"));
    assert!(names.contains(&"Filter ID"));
    let expires_in = embed.fields.iter().find(|f| f.name == "Expires In").unwrap();
    assert_eq!(expires_in.value, "7d 0h");

    let store = f.store.clone();
    eventually(|| store.bans.lock().len() == 1).await;
    assert_eq!(store.bans.lock()[0].action, BanAction::Gag);

    f.cancel.cancel();
}

#[tokio::test]
async fn test_clean_and_invalid_messages_ignored() {
    let mut f = fixture(2, BanAction::Ban);
    let now = Utc::now();

    assert_eq!(f.engine.handle(&say(PLAYER, "good game"), now), None);
    assert_eq!(f.engine.handle(&say(SteamId(0), "badword"), now), None);

    let not_chat = Envelope::new(EventKind::Kill, ServerRef::new(1, "eu-1"), now);
    assert_eq!(f.engine.handle(&not_chat, now), None);

    assert!(f.notifications.try_recv().is_err());
    assert!(f.engine.tracker().is_empty());

    f.cancel.cancel();
}

#[tokio::test]
async fn test_expired_warning_swept() {
    let mut f = fixture(2, BanAction::Ban);
    let now = Utc::now();

    f.engine.handle(&say(PLAYER, "badword"), now);
    assert_eq!(f.engine.tracker().count(PLAYER), 1);

    assert_eq!(f.engine.sweep(now + Duration::minutes(61)), 1);
    assert!(!f.engine.tracker().is_tracked(PLAYER));

    // Next offense starts a fresh count
    assert_eq!(
        f.engine.handle(&say(PLAYER, "badword"), now + Duration::minutes(62)),
        Some(WarnOutcome::Warned { count: 1 })
    );

    f.cancel.cancel();
}

#[tokio::test]
async fn test_run_consumes_subscription() {
    let f = fixture(2, BanAction::Ban);
    let bus = EventBus::new();
    let subscription = bus
        .subscribe("warnings", Interest::kinds(&[EventKind::Say, EventKind::SayTeam]), 8)
        .unwrap();

    let mut notifications = f.notifications;
    let handle = tokio::spawn(f.engine.run(subscription, f.cancel.clone()));

    bus.publish(say(PLAYER, "badword"));
    let notice = tokio::time::timeout(StdDuration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(embed_title(&notice), "Language Warning (#1/2)");

    f.cancel.cancel();
    handle.await.unwrap();
}

#[test]
fn test_fmt_duration() {
    assert_eq!(fmt_duration(Duration::minutes(5)), "5m");
    assert_eq!(fmt_duration(Duration::minutes(125)), "2h 5m");
    assert_eq!(fmt_duration(Duration::hours(50)), "2d 2h");
}

#[tokio::test]
async fn test_oversized_ban_duration_is_permanent() {
    let mut f = fixture_with(0, BanAction::Ban, Duration::try_days(365 * 300_000), 32);

    let outcome = f.engine.handle(&say(PLAYER, "badword"), Utc::now());
    assert!(matches!(outcome, Some(WarnOutcome::Escalated { .. })));

    let embed = f.notifications.try_recv().unwrap().embed;
    let expires_at = embed.fields.iter().find(|f| f.name == "Expires At").unwrap();
    assert_eq!(expires_at.value, "Permanent");

    let store = f.store.clone();
    eventually(move || store.bans.lock().len() == 1).await;
    assert_eq!(f.store.bans.lock()[0].valid_until, None);

    f.cancel.cancel();
}

#[tokio::test]
async fn test_escalation_survives_full_worker_queue() {
    let f = fixture_with(0, BanAction::Ban, Some(Duration::weeks(1)), 1);

    // Park the only worker and fill its queue
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    f.pool
        .submit("blocker", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .unwrap();
    started_rx.await.unwrap();
    f.pool.submit("queued", async {}).unwrap();

    let mut engine = f.engine;
    let outcome = engine.handle(&say(PLAYER, "badword"), Utc::now());
    assert!(matches!(outcome, Some(WarnOutcome::Escalated { .. })));
    assert!(!engine.tracker().is_tracked(PLAYER));

    let store = f.store.clone();
    eventually(move || store.bans.lock().len() == 1).await;
    let control = f.control.clone();
    eventually(move || !control.commands().is_empty()).await;
    assert!(f.control.commands()[0].1.starts_with("sm_kick"));

    let _ = release_tx.send(());
    f.cancel.cancel();
}
