//! End-to-end scenarios for the task bot.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use task_bot::{TASK_TEXT, TaskState, build_dispatcher, bundled_translations, handlers};
use taskbot::core::{
    ActivityStore, Delivery, Event, FsmKey, FsmStore, MemoryActivityStore, MemoryStorage,
    MemoryUserStore, NewUser, OutboxBot, Translations, Translator, UserId, UserStore,
};
use taskbot::framework::{
    Category, Context, CycleState, Dispatcher, Filter, Outcome, RegistrationError, Router,
    SharedResources,
};
use taskbot::runtime::{BotRuntime, ChannelSource, TaskbotConfig};

const ADMIN: UserId = 100;

struct Harness {
    bot: Arc<OutboxBot>,
    storage: Arc<MemoryStorage>,
    fsm: FsmStore,
    users: Arc<MemoryUserStore>,
    activity: Arc<MemoryActivityStore>,
    translations: Arc<Translations>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        let bot = Arc::new(OutboxBot::new());
        let storage = Arc::new(MemoryStorage::new());
        let fsm = FsmStore::new(storage.clone(), Duration::from_secs(3600));
        let users = Arc::new(MemoryUserStore::new());
        let activity = Arc::new(MemoryActivityStore::new());
        let translations = Arc::new(bundled_translations().unwrap());

        let resources = Arc::new(
            SharedResources::new(users.clone(), activity.clone(), translations.clone())
                .with_admins([ADMIN]),
        );
        let dispatcher = build_dispatcher(
            bot.clone(),
            fsm.clone(),
            resources,
            Duration::from_secs(5),
        )
        .unwrap();

        Self {
            bot,
            storage,
            fsm,
            users,
            activity,
            translations,
            dispatcher,
        }
    }

    fn ru(&self, key: &str) -> String {
        self.translations.translate("ru", key)
    }

    fn en(&self, key: &str) -> String {
        self.translations.translate("en", key)
    }

    async fn state(&self, user: UserId) -> Option<TaskState> {
        self.fsm.get(&FsmKey::new(user, user)).await.unwrap().state_as()
    }

    async fn register(&self, user: UserId) {
        self.users
            .add_user(NewUser {
                user_id: user,
                username: None,
                first_name: format!("User {user}"),
                last_name: String::new(),
                language: "ru".into(),
            })
            .await
            .unwrap();
    }
}

fn message(user: UserId, text: &str) -> Event {
    Event::message(
        user,
        user,
        text,
        json!({ "from": { "id": user, "first_name": "Test", "language_code": "en" } }),
    )
}

fn action(user: UserId, action_id: &str) -> Event {
    Event::action(user, user, action_id, json!({ "from": { "id": user } }))
}

#[tokio::test]
async fn test_start_from_idle_welcomes_and_stays_idle() {
    let h = Harness::new();

    let report = h.dispatcher.dispatch(message(1, "/start")).await;

    assert_eq!(report.state, CycleState::Committed);
    assert_eq!(report.handler(), Some("welcome"));
    assert_eq!(h.bot.texts_to(1), vec![h.ru("start")]);
    assert!(h.fsm.get(&FsmKey::new(1, 1)).await.unwrap().is_idle());
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn test_task_text_moves_to_person_prompt() {
    let h = Harness::new();
    let key = FsmKey::new(1, 1);
    h.fsm
        .set_state(&key, Some(TaskState::AwaitingTaskText.into()))
        .await
        .unwrap();

    let report = h.dispatcher.dispatch(message(1, "buy milk")).await;

    assert_eq!(report.handler(), Some("task_text"));
    let record = h.fsm.get(&key).await.unwrap();
    assert_eq!(record.field::<String>(TASK_TEXT).as_deref(), Some("buy milk"));
    assert_eq!(record.state_as(), Some(TaskState::AwaitingTaskPerson));
    assert_eq!(h.bot.texts_to(1), vec![h.ru("task_person_prompt")]);
}

#[tokio::test]
async fn test_banned_user_is_ignored() {
    let h = Harness::new();
    h.register(5).await;
    h.users.set_banned(5, true).await.unwrap();

    let report = h.dispatcher.dispatch(message(5, "/start")).await;

    assert_eq!(report.state, CycleState::Dropped);
    assert_eq!(
        report.outcome,
        Some(Outcome::ShortCircuited {
            middleware: "ban_check".into()
        })
    );
    assert!(h.bot.sent().is_empty());
    assert_eq!(h.activity.activity(5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_back_to_back_events_apply_in_order() {
    let h = Harness::new();

    let first = h.dispatcher.submit(message(1, "/newtask"));
    let second = h.dispatcher.submit(message(1, "buy milk"));
    let third = h.dispatcher.submit(message(1, "Ann"));

    let handlers: Vec<_> = [first.await, second.await, third.await]
        .into_iter()
        .map(|report| report.unwrap().handler().map(str::to_string))
        .collect();
    assert_eq!(
        handlers,
        vec![
            Some("new_task".to_string()),
            Some("task_text".to_string()),
            Some("task_person".to_string()),
        ]
    );

    let texts = h.bot.texts_to(1);
    assert_eq!(texts[0], h.ru("task_text_prompt"));
    assert_eq!(texts[1], h.ru("task_person_prompt"));
    assert!(texts[2].contains("buy milk") && texts[2].contains("Ann"));
    assert_eq!(h.state(1).await, None);
    assert_eq!(h.dispatcher.active_keys(), 0);
}

#[tokio::test]
async fn test_distinct_keys_do_not_share_state() {
    let h = Harness::new();

    let a = h.dispatcher.submit(message(1, "/newtask"));
    let b = h.dispatcher.submit(message(2, "hello"));
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(h.state(1).await, Some(TaskState::AwaitingTaskText));
    assert_eq!(h.state(2).await, None);
    assert_eq!(h.bot.texts_to(2), vec![h.ru("unknown")]);
}

#[tokio::test]
async fn test_full_flow_notifies_registered_assignee() {
    let h = Harness::new();
    h.dispatcher.dispatch(message(2, "/start")).await;
    h.bot.drain();

    for text in ["/newtask", "buy milk", "2"] {
        assert!(h.dispatcher.dispatch(message(1, text)).await.is_committed());
    }

    let assigned = h.bot.texts_to(2);
    assert_eq!(assigned.len(), 1);
    assert!(assigned[0].contains("buy milk"));

    let created = h.bot.texts_to(1).pop().unwrap();
    assert_eq!(
        created,
        h.ru("task_created")
            .replace("{task}", "buy milk")
            .replace("{person}", "2")
    );
    let record = h.fsm.get(&FsmKey::new(1, 1)).await.unwrap();
    assert!(record.is_idle());
    assert!(record.data.is_empty());
}

#[tokio::test]
async fn test_failed_notification_keeps_state() {
    let h = Harness::new();
    h.dispatcher.dispatch(message(1, "/newtask")).await;
    h.dispatcher.dispatch(message(1, "buy milk")).await;

    h.bot.set_disconnected(true);
    let report = h.dispatcher.dispatch(message(1, "Ann")).await;

    assert_eq!(report.state, CycleState::Failed);
    assert_eq!(report.delivery(), Delivery::Processed);
    assert_eq!(h.state(1).await, Some(TaskState::AwaitingTaskPerson));

    h.bot.set_disconnected(false);
    let retry = h.dispatcher.dispatch(message(1, "Ann")).await;
    assert_eq!(retry.handler(), Some("task_person"));
    assert_eq!(h.state(1).await, None);
}

#[tokio::test]
async fn test_cancel_only_inside_a_flow() {
    let h = Harness::new();

    let idle = h.dispatcher.dispatch(message(1, "/cancel")).await;
    assert_eq!(idle.handler(), Some("fallback"));

    h.dispatcher.dispatch(message(1, "/newtask")).await;
    let cancel = h.dispatcher.dispatch(message(1, "/cancel")).await;
    assert_eq!(cancel.handler(), Some("cancel"));
    assert_eq!(h.state(1).await, None);
    assert_eq!(h.bot.texts_to(1).last(), Some(&h.ru("cancelled")));
}

#[tokio::test]
async fn test_start_inside_a_flow_restarts() {
    let h = Harness::new();
    h.dispatcher.dispatch(message(1, "/newtask")).await;

    let report = h.dispatcher.dispatch(message(1, "/start")).await;

    assert_eq!(report.handler(), Some("restart"));
    assert_eq!(h.state(1).await, None);
}

#[tokio::test]
async fn test_language_switch() {
    let h = Harness::new();

    let menu = h.dispatcher.dispatch(message(1, "/language")).await;
    assert_eq!(menu.handler(), Some("language_menu"));
    let markup = h.bot.sent()[0].reply.markup.clone().unwrap();
    assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "lang:en");
    assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], "lang:ru");
    h.bot.drain();

    let report = h.dispatcher.dispatch(action(1, "lang:en")).await;
    assert_eq!(report.handler(), Some("language_set"));
    assert_eq!(h.users.get_language(1).await.unwrap().as_deref(), Some("en"));
    assert_eq!(h.bot.texts_to(1), vec![h.en("language_saved")]);

    h.dispatcher.dispatch(message(1, "/start")).await;
    assert_eq!(h.bot.texts_to(1).last(), Some(&h.en("start")));
}

#[tokio::test]
async fn test_unknown_language_is_rejected() {
    let h = Harness::new();

    h.dispatcher.dispatch(action(1, "lang:de")).await;

    assert_eq!(h.users.get_language(1).await.unwrap().as_deref(), Some("ru"));
    assert!(h.bot.sent().is_empty());
}

#[tokio::test]
async fn test_admin_commands() {
    let h = Harness::new();
    h.register(2).await;

    let denied = h.dispatcher.dispatch(message(3, "/ban 2")).await;
    assert_eq!(denied.handler(), Some("fallback"));
    assert_eq!(h.users.get_banned(2).await.unwrap(), Some(false));

    let usage = h.dispatcher.dispatch(message(ADMIN, "/ban")).await;
    assert_eq!(usage.handler(), Some("ban"));
    assert_eq!(
        h.bot.texts_to(ADMIN).last(),
        Some(&h.ru("ban_usage").replace("{command}", "ban"))
    );

    h.dispatcher.dispatch(message(ADMIN, "/ban 2")).await;
    assert_eq!(h.users.get_banned(2).await.unwrap(), Some(true));
    assert_eq!(
        h.dispatcher.dispatch(message(2, "hi")).await.state,
        CycleState::Dropped
    );

    h.dispatcher.dispatch(message(ADMIN, "/unban 2")).await;
    assert_eq!(h.users.get_banned(2).await.unwrap(), Some(false));

    h.dispatcher.dispatch(message(ADMIN, "/ban 404")).await;
    assert_eq!(
        h.bot.texts_to(ADMIN).last(),
        Some(&h.ru("user_not_found").replace("{id}", "404"))
    );
}

#[tokio::test]
async fn test_stats_counts_activity() {
    let h = Harness::new();
    for _ in 0..3 {
        h.dispatcher.dispatch(message(2, "hi")).await;
    }

    h.dispatcher.dispatch(message(ADMIN, "/stats 2")).await;

    assert_eq!(
        h.bot.texts_to(ADMIN).last(),
        Some(&h.ru("stats").replace("{id}", "2").replace("{count}", "3"))
    );
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let h = Harness::new();
    let key = FsmKey::new(1, 1);

    h.dispatcher.dispatch(message(1, "/newtask")).await;
    let once = h.fsm.get(&key).await.unwrap();
    h.dispatcher.dispatch(message(1, "/newtask")).await;
    let twice = h.fsm.get(&key).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.state_as(), Some(TaskState::AwaitingTaskText));
}

#[tokio::test]
async fn test_storage_outage_apologizes_and_asks_for_retry() {
    let h = Harness::new();
    h.storage.set_offline(true);

    let report = h.dispatcher.dispatch(message(1, "/start")).await;

    assert_eq!(report.state, CycleState::Failed);
    assert_eq!(report.delivery(), Delivery::Retry);
    assert_eq!(h.bot.texts_to(1), vec![h.ru("error")]);
}

#[tokio::test]
async fn test_stale_action_is_answered_silently() {
    let h = Harness::new();

    let report = h.dispatcher.dispatch(action(1, "task:done:7")).await;

    assert_eq!(report.handler(), Some("fallback"));
    assert!(h.bot.sent().is_empty());
}

#[test]
fn test_catch_all_before_specific_is_rejected() {
    let mut router = Router::new("broken");
    router
        .register(Category::Fallback, Filter::any(), |_ctx: Arc<Context>| async {})
        .unwrap();
    let err = router
        .register(Category::Fallback, Filter::text_eq("x"), |_ctx: Arc<Context>| async {})
        .unwrap_err();
    assert!(matches!(err, RegistrationError::Shadowed { .. }));
}

#[test]
fn test_router_after_fallback_is_rejected() {
    let fsm = FsmStore::in_memory(Duration::from_secs(60));
    let builder = Dispatcher::builder(Arc::new(OutboxBot::new()), fsm)
        .include_router(handlers::others::router().unwrap())
        .unwrap();

    let mut late = Router::new("late");
    late.register(Category::Fallback, Filter::plain_text(), |_ctx: Arc<Context>| async {})
        .unwrap();
    assert!(matches!(
        builder.include_router(late),
        Err(RegistrationError::Shadowed { .. })
    ));
}

#[tokio::test]
async fn test_runtime_drives_the_bot() {
    let h = Harness::new();
    let mut config = TaskbotConfig::default();
    config.bot.token = "test".into();
    config.dispatch.poll_interval_ms = 10;
    let runtime = BotRuntime::from_config(config);
    h.register(2).await;

    let (sender, source) = ChannelSource::new(16, 1);
    for event in [
        message(1, "/newtask"),
        message(2, "/start"),
        message(1, "buy milk"),
        message(1, "2"),
    ] {
        sender.send(event).await.unwrap();
    }
    drop(sender);

    let source = Arc::new(source);
    let stats = runtime
        .run_until(h.dispatcher.clone(), source.clone(), std::future::pending())
        .await;

    assert_eq!(stats.received, 4);
    assert_eq!(stats.committed, 4);
    assert_eq!(source.pending(), 0);
    assert_eq!(h.state(1).await, None);
    assert!(h.bot.texts_to(2).iter().any(|t| t.contains("buy milk")));
}
