use rand::rngs::StdRng;
use rand::SeedableRng;

use recollect::config::Config;
use recollect::dispatch::{
    Action, Dispatcher, InboundMessage, QuoteKey, TagCommand, TagDownload, TargetRef,
};
use recollect::scheduler::GroupRecallConfig;
use recollect::store::Store;

const GROUP: i64 = 100;
const SENDER: i64 = 10001;

fn config() -> Config {
    serde_json::from_value(serde_json::json!({
        "databasePath": ":memory:",
        "imageDir": "/tmp/images",
        "enabledGroups": [],
        "randomRecall": [],
        "cacheSize": 16,
    }))
    .expect("config")
}

fn dispatcher(cfg: &Config) -> Dispatcher {
    let store = Store::open(":memory:").expect("store");
    Dispatcher::with_rng(cfg, store, StdRng::seed_from_u64(42))
}

fn message(text: &str, images: Vec<String>) -> InboundMessage {
    InboundMessage {
        group_id: GROUP,
        sender_id: SENDER,
        sequence_ids: vec![1],
        text: text.into(),
        images,
    }
}

#[tokio::test]
async fn trigger_by_alias_sends_a_stored_image() {
    let d = dispatcher(&config());
    assert!(d.store().bind_alias(10002, "张三").await);
    assert!(d.store().insert_tagged_image(10002, SENDER, GROUP, "zs.jpg").await);

    let actions = d.handle_message(&message("来点张三黑历史", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::SendImage {
            group_id: GROUP,
            filename: "zs.jpg".into(),
        }]
    );
}

#[tokio::test]
async fn trigger_suffix_variant_also_matches() {
    let d = dispatcher(&config());
    assert!(d.store().bind_alias(10002, "张三").await);
    assert!(d.store().insert_tagged_image(10002, SENDER, GROUP, "zs.jpg").await);

    let actions = d.handle_message(&message("来点张三语录", vec![])).await;
    assert_eq!(actions.len(), 1);
    assert!(matches!(actions[0], Action::SendImage { .. }));
}

#[tokio::test]
async fn trigger_self_keyword_resolves_to_sender() {
    let d = dispatcher(&config());
    assert!(d.store().insert_tagged_image(SENDER, SENDER, GROUP, "me.jpg").await);

    let actions = d.handle_message(&message("来点我的语录", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::SendImage {
            group_id: GROUP,
            filename: "me.jpg".into(),
        }]
    );
}

#[tokio::test]
async fn trigger_mention_syntax_resolves_numeric_id() {
    let d = dispatcher(&config());
    assert!(d.store().insert_tagged_image(10002, SENDER, GROUP, "at.jpg").await);

    let actions = d.handle_message(&message("来点@10002黑历史", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::SendImage {
            group_id: GROUP,
            filename: "at.jpg".into(),
        }]
    );
}

#[tokio::test]
async fn unknown_name_gets_a_reply() {
    let d = dispatcher(&config());
    let actions = d.handle_message(&message("来点路人黑历史", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::Reply {
            group_id: GROUP,
            text: "未记录的昵称:路人".into(),
        }]
    );
}

#[tokio::test]
async fn alias_below_platform_id_floor_is_rejected() {
    let d = dispatcher(&config());
    // a stale or corrupt binding below the platform id floor
    assert!(d.store().bind_alias(123, "张三").await);
    let actions = d.handle_message(&message("来点张三黑历史", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::Reply {
            group_id: GROUP,
            text: "未记录的昵称:张三".into(),
        }]
    );
}

#[tokio::test]
async fn trigger_with_nothing_stored_warns() {
    let d = dispatcher(&config());
    assert!(d.store().bind_alias(10002, "张三").await);

    let actions = d.handle_message(&message("来点张三黑历史", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::Reply {
            group_id: GROUP,
            text: "找不到张三的黑历史".into(),
        }]
    );
}

#[tokio::test]
async fn only_the_first_trigger_in_a_message_is_handled() {
    let d = dispatcher(&config());
    assert!(d.store().insert_tagged_image(SENDER, SENDER, GROUP, "me.jpg").await);

    let actions = d
        .handle_message(&message("来点我的黑历史 来点我的语录", vec![]))
        .await;
    assert_eq!(actions.len(), 1);
}

#[tokio::test]
async fn disabled_group_is_ignored_entirely() {
    let mut cfg = config();
    cfg.enabled_groups = vec![999];
    let d = dispatcher(&cfg);

    let actions = d
        .handle_message(&message("来点我的黑历史", vec!["ref-1".into()]))
        .await;
    assert!(actions.is_empty());
    // the message was not cached either
    assert!(d.cache().get(&[1], GROUP).is_none());
}

#[tokio::test]
async fn image_messages_are_cached_for_quote_recovery() {
    let d = dispatcher(&config());
    let actions = d
        .handle_message(&message("look at this", vec!["ref-1".into()]))
        .await;
    assert!(actions.is_empty());

    let cached = d.cache().get(&[1], GROUP).expect("cached");
    assert_eq!(cached.images, vec!["ref-1"]);
    assert_eq!(cached.sender_id, SENDER);
}

#[tokio::test]
async fn autonomous_fire_is_silent_when_nothing_is_stored() {
    let mut cfg = config();
    // pool size 1 fires on every message
    cfg.random_recall = vec![GroupRecallConfig {
        group_id: GROUP,
        pool_size: 1,
    }];
    let d = dispatcher(&cfg);

    let actions = d.handle_message(&message("hello", vec![])).await;
    assert!(actions.is_empty(), "not-found warning must be suppressed");
}

#[tokio::test]
async fn autonomous_fire_sends_a_stored_image() {
    let mut cfg = config();
    cfg.random_recall = vec![GroupRecallConfig {
        group_id: GROUP,
        pool_size: 1,
    }];
    let d = dispatcher(&cfg);
    assert!(d.store().insert_tagged_image(SENDER, SENDER, GROUP, "me.jpg").await);

    let actions = d.handle_message(&message("hello", vec![])).await;
    assert_eq!(
        actions,
        vec![Action::SendImage {
            group_id: GROUP,
            filename: "me.jpg".into(),
        }]
    );
}

#[tokio::test]
async fn tag_via_quote_recovers_images_from_the_cache() {
    let d = dispatcher(&config());
    d.handle_message(&message("pic", vec!["ref-1".into(), "ref-2".into()]))
        .await;

    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Mention(10002),
        images: vec![],
        quote: Some(QuoteKey {
            origin_id: GROUP,
            sequence_ids: vec![1],
        }),
    };
    let plan = d.prepare_tag(&cmd).await.expect("plan");
    assert_eq!(plan.owner_id, 10002);
    assert_eq!(plan.images, vec!["ref-1", "ref-2"]);

    let downloads = vec![
        TagDownload::File {
            image: "ref-1".into(),
            filename: "f1.jpg".into(),
        },
        TagDownload::File {
            image: "ref-2".into(),
            filename: "f2.jpg".into(),
        },
    ];
    let actions = d.complete_tag(&plan, &downloads).await;
    assert_eq!(
        actions,
        vec![Action::Reply {
            group_id: GROUP,
            text: "添加黑历史成功".into(),
        }]
    );
    let mut files = d.store().list_tagged_images(10002, GROUP).await;
    files.sort();
    assert_eq!(files, vec!["f1.jpg", "f2.jpg"]);
}

#[tokio::test]
async fn tag_with_missing_quote_reports_original_not_found() {
    let d = dispatcher(&config());
    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Mention(10002),
        images: vec![],
        quote: Some(QuoteKey {
            origin_id: GROUP,
            sequence_ids: vec![77],
        }),
    };
    let err = d.prepare_tag(&cmd).await.expect_err("no original");
    assert_eq!(
        err,
        Action::Reply {
            group_id: GROUP,
            text: "找不到原始消息".into(),
        }
    );
}

#[tokio::test]
async fn tag_without_images_is_an_argument_error() {
    let d = dispatcher(&config());
    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Mention(10002),
        images: vec![],
        quote: None,
    };
    let err = d.prepare_tag(&cmd).await.expect_err("no images");
    assert_eq!(
        err,
        Action::Reply {
            group_id: GROUP,
            text: "参数错误:对象非图像".into(),
        }
    );
}

#[tokio::test]
async fn tag_by_name_resolves_through_aliases() {
    let d = dispatcher(&config());
    assert!(d.store().bind_alias(10002, "张三").await);

    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Name("张三".into()),
        images: vec!["ref-1".into()],
        quote: None,
    };
    let plan = d.prepare_tag(&cmd).await.expect("plan");
    assert_eq!(plan.owner_id, 10002);
}

#[tokio::test]
async fn tag_by_unknown_name_is_rejected() {
    let d = dispatcher(&config());
    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Name("路人".into()),
        images: vec!["ref-1".into()],
        quote: None,
    };
    let err = d.prepare_tag(&cmd).await.expect_err("unknown name");
    assert_eq!(
        err,
        Action::Reply {
            group_id: GROUP,
            text: "路人是谁呢QaQ".into(),
        }
    );
}

#[tokio::test]
async fn tag_by_name_can_be_disabled() {
    let mut cfg = config();
    cfg.allow_tag_by_name = false;
    let d = dispatcher(&cfg);
    assert!(d.store().bind_alias(10002, "张三").await);

    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Name("张三".into()),
        images: vec!["ref-1".into()],
        quote: None,
    };
    let err = d.prepare_tag(&cmd).await.expect_err("disabled");
    assert!(matches!(err, Action::Reply { .. }));
}

#[tokio::test]
async fn partial_tag_failure_reports_per_item() {
    let d = dispatcher(&config());
    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Mention(10002),
        images: vec!["ref-1".into(), "ref-2".into()],
        quote: None,
    };
    let plan = d.prepare_tag(&cmd).await.expect("plan");

    let downloads = vec![
        TagDownload::File {
            image: "ref-1".into(),
            filename: "f1.jpg".into(),
        },
        TagDownload::Failed {
            image: "ref-2".into(),
        },
    ];
    let actions = d.complete_tag(&plan, &downloads).await;
    assert_eq!(actions.len(), 2);
    assert_eq!(
        actions[0],
        Action::Reply {
            group_id: GROUP,
            text: "添加黑历史部分失败".into(),
        }
    );
    match &actions[1] {
        Action::Reply { text, .. } => {
            assert!(text.contains("ref-2"), "breakdown lists the failed item: {text}");
            assert!(text.contains("下载失败"), "breakdown names the cause: {text}");
        }
        other => panic!("expected breakdown reply, got {other:?}"),
    }
    // the successful item still landed
    assert_eq!(d.store().list_tagged_images(10002, GROUP).await, vec!["f1.jpg"]);
}

#[tokio::test]
async fn all_downloads_failing_is_a_blanket_failure() {
    let d = dispatcher(&config());
    let cmd = TagCommand {
        group_id: GROUP,
        operator_id: SENDER,
        target: TargetRef::Mention(10002),
        images: vec!["ref-1".into()],
        quote: None,
    };
    let plan = d.prepare_tag(&cmd).await.expect("plan");
    let actions = d
        .complete_tag(
            &plan,
            &[TagDownload::Failed {
                image: "ref-1".into(),
            }],
        )
        .await;
    assert_eq!(
        actions,
        vec![Action::Reply {
            group_id: GROUP,
            text: "添加黑历史大失败".into(),
        }]
    );
    assert!(d.store().list_tagged_images(10002, GROUP).await.is_empty());
}

#[tokio::test]
async fn bind_command_round_trips_through_the_store() {
    let d = dispatcher(&config());
    let action = d.bind_command(GROUP, SENDER, "外号").await;
    assert_eq!(
        action,
        Action::Reply {
            group_id: GROUP,
            text: "绑定昵称成功".into(),
        }
    );
    assert_eq!(d.store().resolve_alias("外号").await, SENDER);
}

#[tokio::test]
async fn bind_command_can_be_disabled() {
    let mut cfg = config();
    cfg.allow_bind_command = false;
    let d = dispatcher(&cfg);
    let action = d.bind_command(GROUP, SENDER, "外号").await;
    assert_eq!(
        action,
        Action::Reply {
            group_id: GROUP,
            text: "绑定指令未启用".into(),
        }
    );
    assert_eq!(d.store().resolve_alias("外号").await, 0);
}
