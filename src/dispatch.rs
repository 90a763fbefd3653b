//! Dispatch coordinator: the boundary between the chat platform and the
//! engine core.
//!
//! Inbound events come in as platform-neutral structs; everything the bot
//! wants to do comes back out as [`Action`] values for the glue to
//! execute. The engine itself never talks to the chat platform and never
//! performs downloads; pre-downloaded filenames are handed in by the
//! glue (see [`TagDownload`]).

use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CachedMessage, MessageCache};
use crate::config::Config;
use crate::scheduler::RecallScheduler;
use crate::store::Store;

/// Platform user ids start here; anything below is a failed resolution.
const MIN_PLATFORM_ID: i64 = 10000;

/// Literal self-reference in a recall trigger ("my own history").
const SELF_KEYWORD: &str = "我的";

/// "来点<name>黑历史" / "来点<name>语录", name 1..=20 chars, lazy so the
/// suffix is not swallowed into the name.
fn name_trigger_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("来点(.{1,20}?)(?:黑历史|语录)").expect("static regex"))
}

/// "@123456789" mention-reference syntax inside a trigger name.
fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^@([0-9]+)$").expect("static regex"))
}

/// An inbound group message, already stripped to what the engine needs.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub group_id: i64,
    pub sender_id: i64,
    /// Per-message sequence ids from the platform source key.
    #[serde(default)]
    pub sequence_ids: Vec<i32>,
    #[serde(default)]
    pub text: String,
    /// Opaque platform references to attached images.
    #[serde(default)]
    pub images: Vec<String>,
}

/// What the platform glue should do on the engine's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Upload and send a stored image file to the group.
    SendImage { group_id: i64, filename: String },
    /// Send a plain text reply to the group.
    Reply { group_id: i64, text: String },
}

/// Who a tag command is aimed at.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRef {
    /// Direct mention of a user id.
    Mention(i64),
    /// A bound nickname, resolved through the alias table.
    Name(String),
}

/// Source key of a quoted message, recoverable from the recall cache.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteKey {
    pub origin_id: i64,
    pub sequence_ids: Vec<i32>,
}

/// "Tag these images to X" as received from the platform glue.
#[derive(Debug, Clone, Deserialize)]
pub struct TagCommand {
    pub group_id: i64,
    pub operator_id: i64,
    pub target: TargetRef,
    /// Images attached to the command message itself.
    #[serde(default)]
    pub images: Vec<String>,
    /// Set when the command quotes an earlier message; the images then
    /// come from the cached original instead of `images`.
    #[serde(default)]
    pub quote: Option<QuoteKey>,
}

/// A resolved tag command: who gets tagged, and which image references
/// the glue has to download before calling [`Dispatcher::complete_tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPlan {
    pub owner_id: i64,
    pub operator_id: i64,
    pub group_id: i64,
    pub images: Vec<String>,
}

/// Download outcome for one image reference, produced by the glue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagDownload {
    /// Downloaded into the image directory under `filename`.
    File { image: String, filename: String },
    /// Download failed; recorded per-item rather than failing the batch.
    Failed { image: String },
}

/// Per-image outcome of a tag command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Success,
    DownloadFail,
    DatabaseFail,
}

impl fmt::Display for AddResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddResult::Success => write!(f, "成功"),
            AddResult::DownloadFail => write!(f, "下载失败"),
            AddResult::DatabaseFail => write!(f, "数据库写入失败"),
        }
    }
}

/// Feeds inbound events to the cache and scheduler and turns commands
/// into store calls. Owns the three core components; the glue reaches
/// them through [`Dispatcher::cache`] and [`Dispatcher::store`].
pub struct Dispatcher {
    cache: MessageCache,
    scheduler: RecallScheduler,
    store: Store,
    enabled_groups: Vec<i64>,
    allow_tag_by_name: bool,
    allow_bind_command: bool,
    /// For picking which stored image to resurface.
    rng: Mutex<StdRng>,
}

impl Dispatcher {
    pub fn new(config: &Config, store: Store) -> Self {
        Self::with_rng(config, store, StdRng::from_os_rng())
    }

    /// Seedable constructor for deterministic tests.
    pub fn with_rng(config: &Config, store: Store, rng: StdRng) -> Self {
        Self {
            cache: MessageCache::new(config.cache_size),
            scheduler: RecallScheduler::new(&config.random_recall),
            store,
            enabled_groups: config.enabled_groups.clone(),
            allow_tag_by_name: config.allow_tag_by_name,
            allow_bind_command: config.allow_bind_command,
            rng: Mutex::new(rng),
        }
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Empty group list means no restriction.
    fn group_enabled(&self, group_id: i64) -> bool {
        self.enabled_groups.is_empty() || self.enabled_groups.contains(&group_id)
    }

    /// Handle one ordinary group message: cache it if it carries images,
    /// advance the sender's recall counter, and answer a "来点<name>黑历史"
    /// trigger if the text contains one (first match only).
    pub async fn handle_message(&self, msg: &InboundMessage) -> Vec<Action> {
        if !self.group_enabled(msg.group_id) {
            return Vec::new();
        }

        if !msg.images.is_empty() {
            self.cache.put(CachedMessage {
                origin_id: msg.group_id,
                sequence_ids: msg.sequence_ids.clone(),
                sender_id: msg.sender_id,
                images: msg.images.clone(),
            });
        }

        let mut actions = Vec::new();

        if let Some(fire) = self.scheduler.on_message(msg.group_id, msg.sender_id) {
            actions.extend(
                self.send_random(fire.group_id, fire.user_id, None, true)
                    .await,
            );
        }

        if let Some(caps) = name_trigger_re().captures(&msg.text) {
            let name = caps[1].trim().to_string();
            let owner_id = self.resolve_name(&name, msg.sender_id).await;
            if owner_id < MIN_PLATFORM_ID {
                actions.push(Action::Reply {
                    group_id: msg.group_id,
                    text: format!("未记录的昵称:{name}"),
                });
            } else {
                actions.extend(
                    self.send_random(msg.group_id, owner_id, Some(&name), false)
                        .await,
                );
            }
        }

        actions
    }

    /// Resolve a trigger name to a user id: literal self keyword, then
    /// "@<numeric id>" mention syntax, then alias lookup. Returns the
    /// store's `0` sentinel (or `-1` for a malformed mention) on failure;
    /// the caller screens against the platform id floor.
    async fn resolve_name(&self, name: &str, sender_id: i64) -> i64 {
        if name == SELF_KEYWORD {
            return sender_id;
        }
        if let Some(caps) = mention_re().captures(name) {
            return caps[1].parse().unwrap_or(-1);
        }
        self.store.resolve_alias(name).await
    }

    /// Send one uniformly random stored image for `owner_id`, or a
    /// not-found reply. `quiet` suppresses the reply for autonomous fires
    /// so users with nothing stored are not spammed with warnings.
    async fn send_random(
        &self,
        group_id: i64,
        owner_id: i64,
        name: Option<&str>,
        quiet: bool,
    ) -> Vec<Action> {
        let files = self.store.list_tagged_images(owner_id, group_id).await;
        if files.is_empty() {
            if quiet {
                debug!(group_id, owner_id, "random recall fired with nothing stored");
                return Vec::new();
            }
            let name = name.unwrap_or("");
            return vec![Action::Reply {
                group_id,
                text: format!("找不到{name}的黑历史"),
            }];
        }
        let idx = self.rng.lock().random_range(0..files.len());
        vec![Action::SendImage {
            group_id,
            filename: files[idx].clone(),
        }]
    }

    /// Resolve a tag command into a [`TagPlan`], or a reply explaining why
    /// it cannot proceed. The glue downloads the plan's image references
    /// and then calls [`Dispatcher::complete_tag`].
    pub async fn prepare_tag(&self, cmd: &TagCommand) -> Result<TagPlan, Action> {
        let reply = |text: String| Action::Reply {
            group_id: cmd.group_id,
            text,
        };

        let images = match &cmd.quote {
            Some(quote) => {
                let cached = self.cache.get(&quote.sequence_ids, quote.origin_id);
                match cached {
                    Some(msg) => msg.images,
                    None => return Err(reply("找不到原始消息".into())),
                }
            }
            None => cmd.images.clone(),
        };
        if images.is_empty() {
            return Err(reply("参数错误:对象非图像".into()));
        }

        let owner_id = match &cmd.target {
            TargetRef::Mention(id) => *id,
            TargetRef::Name(name) => {
                if !self.allow_tag_by_name {
                    return Err(reply("不支持以昵称指定对象".into()));
                }
                let owner_id = self.store.resolve_alias(name.trim()).await;
                if owner_id == 0 {
                    return Err(reply(format!("{name}是谁呢QaQ")));
                }
                owner_id
            }
        };

        Ok(TagPlan {
            owner_id,
            operator_id: cmd.operator_id,
            group_id: cmd.group_id,
            images,
        })
    }

    /// Insert each downloaded image and report per-item results: one
    /// success reply when everything worked, a blanket failure when
    /// nothing did, and an itemized breakdown for partial failures.
    pub async fn complete_tag(&self, plan: &TagPlan, downloads: &[TagDownload]) -> Vec<Action> {
        let mut results: Vec<(String, AddResult)> = Vec::with_capacity(downloads.len());
        for download in downloads {
            match download {
                TagDownload::Failed { image } => {
                    results.push((image.clone(), AddResult::DownloadFail));
                }
                TagDownload::File { image, filename } => {
                    let ok = self
                        .store
                        .insert_tagged_image(
                            plan.owner_id,
                            plan.operator_id,
                            plan.group_id,
                            filename,
                        )
                        .await;
                    let result = if ok {
                        AddResult::Success
                    } else {
                        AddResult::DatabaseFail
                    };
                    results.push((image.clone(), result));
                }
            }
        }

        let failed: Vec<&(String, AddResult)> = results
            .iter()
            .filter(|(_, r)| *r != AddResult::Success)
            .collect();
        for (image, result) in &failed {
            warn!(image = %image, result = %result, "tag image failed");
        }

        let reply = |text: String| Action::Reply {
            group_id: plan.group_id,
            text,
        };

        if failed.is_empty() {
            return vec![reply("添加黑历史成功".into())];
        }
        if failed.len() == results.len() {
            return vec![reply("添加黑历史大失败".into())];
        }
        let mut detail = String::from("失败的黑历史:");
        for (image, result) in &failed {
            detail.push('\n');
            detail.push_str(image);
            detail.push(':');
            detail.push_str(&result.to_string());
        }
        vec![reply("添加黑历史部分失败".into()), reply(detail)]
    }

    /// Bind a nickname to the calling user. Gated by config.
    pub async fn bind_command(&self, group_id: i64, user_id: i64, nickname: &str) -> Action {
        let reply = |text: &str| Action::Reply {
            group_id,
            text: text.into(),
        };
        if !self.allow_bind_command {
            return reply("绑定指令未启用");
        }
        if self.store.bind_alias(user_id, nickname.trim()).await {
            reply("绑定昵称成功")
        } else {
            reply("绑定昵称失败")
        }
    }
}
