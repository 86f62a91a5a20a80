//! Read-only projections of stored blocks.
//!
//! Feed items are rebuilt from the datastore on every read. Blocks hidden by
//! an IGNORE never show up. A projected target is itself projected without
//! annotations and without following its own target.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use skein_shared::block::{ignore_target, Contact};
use skein_shared::constants::{FLAG_TARGET_PREFIX, IGNORE_TARGET_PREFIX};
use skein_shared::{BlockId, BlockType, ThreadId, UserId};
use skein_store::blocks::BlockQuery;
use skein_store::{BlockRecord, Database, StoreError};

use crate::error::CoreError;

/// How deep target resolution may go. Moderation blocks cannot target each
/// other, so one level covers every valid chain.
const MAX_TARGET_DEPTH: u8 = 1;

const CHRONO_TYPES: &[BlockType] = &[
    BlockType::Join,
    BlockType::Leave,
    BlockType::Announce,
    BlockType::Message,
    BlockType::Files,
    BlockType::Comment,
    BlockType::Like,
    BlockType::Flag,
    BlockType::Ignore,
];

/// Comments and likes are attached to their targets instead.
const ANNOTATED_TYPES: &[BlockType] = &[
    BlockType::Join,
    BlockType::Leave,
    BlockType::Announce,
    BlockType::Message,
    BlockType::Files,
    BlockType::Flag,
    BlockType::Ignore,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedMode {
    /// Every block in date order.
    #[default]
    Chrono,
    /// Messages and files with their comments and likes attached.
    Annotated,
}

#[derive(Debug, Clone, Default)]
pub struct FeedRequest {
    /// Restrict to one thread.
    pub thread: Option<ThreadId>,
    /// Start after this block (exclusive).
    pub offset: Option<BlockId>,
    pub limit: u32,
    pub mode: FeedMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub address: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub block: BlockId,
    pub thread: ThreadId,
    pub date: DateTime<Utc>,
    pub user: User,
    #[serde(flatten)]
    pub kind: FeedKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedKind {
    Announce,
    Join,
    Leave,
    Message {
        body: String,
        comments: Vec<FeedItem>,
        likes: Vec<FeedItem>,
    },
    Files {
        target: String,
        caption: String,
        comments: Vec<FeedItem>,
        likes: Vec<FeedItem>,
    },
    Comment {
        body: String,
        target: Option<Box<FeedItem>>,
    },
    Like {
        target: Option<Box<FeedItem>>,
    },
    Flag {
        target: Option<Box<FeedItem>>,
    },
    Ignore {
        target: Option<Box<FeedItem>>,
    },
}

/// One page of a feed, plus where to continue.
#[derive(Debug)]
pub(crate) struct Page {
    pub items: Vec<FeedItem>,
    /// Last block looked at, when more may follow.
    pub next: Option<BlockId>,
}

#[derive(Debug, Clone, Copy)]
struct Options {
    annotations: bool,
    depth: u8,
}

/// Builds feed items against one datastore snapshot.
pub(crate) struct Projector<'a> {
    db: &'a Database,
    /// The local account, shown with its live profile.
    local: &'a Contact,
}

impl<'a> Projector<'a> {
    pub fn new(db: &'a Database, local: &'a Contact) -> Self {
        Self { db, local }
    }

    /// Up to `limit` visible items, newest first, older than `before`.
    pub fn page(
        &self,
        thread: Option<ThreadId>,
        types: &[BlockType],
        mut before: Option<BlockId>,
        limit: u32,
        annotations: bool,
    ) -> Result<Page, CoreError> {
        let mut items = Vec::new();
        if limit == 0 {
            return Ok(Page { items, next: None });
        }

        loop {
            let batch = self.db.list_blocks(&BlockQuery {
                thread,
                types: types.to_vec(),
                before,
                target: None,
                limit,
            })?;
            let exhausted = batch.len() < limit as usize;

            for block in &batch {
                before = Some(block.id);
                if self.is_ignored(&block.id)? {
                    continue;
                }
                let opts = Options { annotations, depth: 0 };
                match self.project(block, opts) {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => {}
                    // e.g. a restored flag whose target never arrived
                    Err(CoreError::BlockNotFound) => {
                        warn!(block = %block.id, "skipping feed item with a missing target");
                    }
                    Err(e) => return Err(e),
                }
                if items.len() == limit as usize {
                    return Ok(Page { items, next: before });
                }
            }

            if exhausted {
                return Ok(Page { items, next: None });
            }
        }
    }

    /// Project any feed block. Merges and invites have no feed form.
    fn project(&self, block: &BlockRecord, opts: Options) -> Result<Option<FeedItem>, CoreError> {
        let item = match block.block_type {
            BlockType::Merge | BlockType::Invite => return Ok(None),
            BlockType::Join => self.join(block)?,
            BlockType::Leave => self.leave(block)?,
            BlockType::Announce => self.announce(block)?,
            BlockType::Message => self.message(block, opts)?,
            BlockType::Files => self.files(block, opts)?,
            BlockType::Comment => self.comment(block, opts)?,
            BlockType::Like => self.like(block, opts)?,
            BlockType::Flag => self.flag(block, opts)?,
            BlockType::Ignore => self.ignore(block, opts)?,
        };
        Ok(Some(item))
    }

    pub fn join(&self, block: &BlockRecord) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Join)?;
        self.item(block, FeedKind::Join)
    }

    pub fn leave(&self, block: &BlockRecord) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Leave)?;
        self.item(block, FeedKind::Leave)
    }

    pub fn announce(&self, block: &BlockRecord) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Announce)?;
        self.item(block, FeedKind::Announce)
    }

    fn message(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Message)?;
        let (comments, likes) = self.annotations(block, opts)?;
        self.item(
            block,
            FeedKind::Message {
                body: block.body.clone().unwrap_or_default(),
                comments,
                likes,
            },
        )
    }

    fn files(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Files)?;
        let (comments, likes) = self.annotations(block, opts)?;
        self.item(
            block,
            FeedKind::Files {
                target: block.target.clone().unwrap_or_default(),
                caption: block.body.clone().unwrap_or_default(),
                comments,
                likes,
            },
        )
    }

    fn comment(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Comment)?;
        let target = self.target(block, "", opts)?;
        self.item(
            block,
            FeedKind::Comment {
                body: block.body.clone().unwrap_or_default(),
                target,
            },
        )
    }

    fn like(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Like)?;
        let target = self.target(block, "", opts)?;
        self.item(block, FeedKind::Like { target })
    }

    fn flag(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Flag)?;
        let target = self.target(block, FLAG_TARGET_PREFIX, opts)?;
        self.item(block, FeedKind::Flag { target })
    }

    fn ignore(&self, block: &BlockRecord, opts: Options) -> Result<FeedItem, CoreError> {
        expect_type(block, BlockType::Ignore)?;
        let target = self.target(block, IGNORE_TARGET_PREFIX, opts)?;
        self.item(block, FeedKind::Ignore { target })
    }

    fn item(&self, block: &BlockRecord, kind: FeedKind) -> Result<FeedItem, CoreError> {
        let author = block.author.ok_or_else(|| {
            CoreError::InvalidThreadBlock(format!("{} block without author", block.block_type))
        })?;
        Ok(FeedItem {
            block: block.id,
            thread: block.thread_id,
            date: block.date,
            user: self.user(&author)?,
            kind,
        })
    }

    fn user(&self, address: &UserId) -> Result<User, CoreError> {
        let contact = if *address == self.local.id {
            Some(self.local.clone())
        } else {
            self.db.get_contact(address)?
        };
        Ok(match contact {
            Some(c) => User {
                address: c.id,
                name: c.name,
                avatar: c.avatar,
            },
            None => User {
                address: *address,
                name: address.short(),
                avatar: None,
            },
        })
    }

    /// Resolve and project the block another block points at. A hidden
    /// target resolves to `None`; a missing one is [`CoreError::BlockNotFound`].
    fn target(
        &self,
        block: &BlockRecord,
        prefix: &str,
        opts: Options,
    ) -> Result<Option<Box<FeedItem>>, CoreError> {
        if opts.depth >= MAX_TARGET_DEPTH {
            return Ok(None);
        }
        let Some(raw) = block.target.as_deref() else {
            return Ok(None);
        };
        let Some(id) = raw
            .strip_prefix(prefix)
            .and_then(|hex| BlockId::from_hex(hex).ok())
        else {
            return Err(CoreError::InvalidTarget(raw.to_string()));
        };

        let target = match self.db.get_block(&id) {
            Ok(target) => target,
            Err(StoreError::NotFound) => return Err(CoreError::BlockNotFound),
            Err(e) => return Err(e.into()),
        };
        if self.is_ignored(&target.id)? {
            return Ok(None);
        }

        let nested = Options {
            annotations: false,
            depth: opts.depth + 1,
        };
        Ok(self.project(&target, nested)?.map(Box::new))
    }

    fn annotations(
        &self,
        block: &BlockRecord,
        opts: Options,
    ) -> Result<(Vec<FeedItem>, Vec<FeedItem>), CoreError> {
        if !opts.annotations {
            return Ok((Vec::new(), Vec::new()));
        }
        let nested = Options {
            annotations: false,
            depth: MAX_TARGET_DEPTH,
        };
        let comments = self.annotations_of(block, BlockType::Comment, nested)?;
        let likes = self.annotations_of(block, BlockType::Like, nested)?;
        Ok((comments, likes))
    }

    fn annotations_of(
        &self,
        block: &BlockRecord,
        block_type: BlockType,
        opts: Options,
    ) -> Result<Vec<FeedItem>, CoreError> {
        let rows = self.db.list_blocks(&BlockQuery {
            thread: Some(block.thread_id),
            types: vec![block_type],
            target: Some(block.id.to_hex()),
            limit: u32::MAX,
            ..Default::default()
        })?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            if self.is_ignored(&row.id)? {
                continue;
            }
            if let Some(item) = self.project(row, opts)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn is_ignored(&self, id: &BlockId) -> Result<bool, CoreError> {
        Ok(self.db.find_block_by_target(&ignore_target(id))?.is_some())
    }
}

fn expect_type(block: &BlockRecord, expected: BlockType) -> Result<(), CoreError> {
    if block.block_type != expected {
        return Err(CoreError::BlockWrongType {
            expected,
            actual: block.block_type,
        });
    }
    Ok(())
}

pub(crate) fn feed_types(mode: FeedMode) -> &'static [BlockType] {
    match mode {
        FeedMode::Chrono => CHRONO_TYPES,
        FeedMode::Annotated => ANNOTATED_TYPES,
    }
}

/// One page of `request`.
pub(crate) fn feed(db: &Database, local: &Contact, request: &FeedRequest) -> Result<Page, CoreError> {
    Projector::new(db, local).page(
        request.thread,
        feed_types(request.mode),
        request.offset,
        request.limit,
        request.mode == FeedMode::Annotated,
    )
}
