//! `jobscout-extension`
//!
//! **Responsibility:** the browser-facing halves of the job-search assistant.
//!
//! This crate provides:
//! - `Background`: per-tab navigation tracking, summary extraction and the
//!   session/entitlement queries, behind one message surface
//! - The content side of a tab: `JobListObserver` for card classification and
//!   dismiss/undo, `SummaryProcessor` for the summary panel, and the
//!   `ContentController` that wires them to the page
//! - A native messaging host (`host::serve`) exposing `Background` over
//!   length-prefixed JSON on stdin/stdout
//!
//! The page itself is reached only through the `JobPage` and `JobListHost`
//! traits; nothing here parses markup.

pub mod background;
pub mod config;
pub mod controller;
pub mod host;
pub mod job_list;
pub mod navigation;
pub mod page;
pub mod panel;
pub mod subscription;

pub use background::{
    AuthStatus, Background, BackgroundReply, BackgroundRequest, ContentCommand, NO_ACTIVE_JOB, RuntimeEvent,
    TabCommand, TabPort,
};
pub use config::ExtensionConfig;
pub use controller::ContentController;
pub use job_list::{
    CardAction, CardClass, CardStyle, DisplayMode, DisplayPreferences, JobCard, JobListHost, JobListObserver,
    ListEvent, NodeId,
};
pub use navigation::{JobChanged, NavigationEvent, NavigationTracker};
pub use page::{JobPage, PageError};
pub use panel::{PanelState, SummaryProcessor, SummaryService};
pub use subscription::{SubscriptionApi, SubscriptionClient, SubscriptionError, SubscriptionStatus};
