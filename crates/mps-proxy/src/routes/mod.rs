//! Static route table.
//!
//! Built once per proxy and registered in order. Specific routes come first
//! and the paywalled catch-all last, so `/api/1/*`, `/js/*` and the service
//! endpoints are never treated as content.

use std::path::PathBuf;

use actix_web::web;
use mps::API_PATH;

pub mod admin;
pub mod health;
pub mod paywall;

/// What a route entry serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Files from a directory, with no payment
    StaticAssets(PathBuf),
    /// Look up or cooperatively close one channel
    ChannelInfo,
    /// List channels, optionally for one sender
    ChannelList,
    /// Receiver overview
    Admin,
    /// Cooperatively close every channel of the receiver
    AdminCloseAll,
    /// Management UI entry point
    Management,
    Health,
    Metrics,
    /// Everything else: paywalled content
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub pattern: String,
    pub kind: RouteKind,
}

impl RouteEntry {
    fn new(pattern: impl Into<String>, kind: RouteKind) -> Self {
        Self {
            pattern: pattern.into(),
            kind,
        }
    }
}

/// Ordered route entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(static_dir: Option<PathBuf>) -> Self {
        let mut entries = Vec::new();
        if let Some(dir) = static_dir {
            entries.push(RouteEntry::new("/js", RouteKind::StaticAssets(dir)));
        }
        entries.extend([
            RouteEntry::new(
                format!("{API_PATH}/channels/{{sender}}/{{block}}"),
                RouteKind::ChannelInfo,
            ),
            RouteEntry::new(format!("{API_PATH}/channels"), RouteKind::ChannelList),
            RouteEntry::new(format!("{API_PATH}/channels/"), RouteKind::ChannelList),
            RouteEntry::new(
                format!("{API_PATH}/channels/{{sender}}"),
                RouteKind::ChannelList,
            ),
            RouteEntry::new(format!("{API_PATH}/admin"), RouteKind::Admin),
            RouteEntry::new(
                format!("{API_PATH}/admin/close_all"),
                RouteKind::AdminCloseAll,
            ),
            RouteEntry::new("/cm", RouteKind::Management),
            RouteEntry::new("/health", RouteKind::Health),
            RouteEntry::new("/metrics", RouteKind::Metrics),
            RouteEntry::new("/{content:.*}", RouteKind::Content),
        ]);
        Self { entries }
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

/// Register every entry of `table` in order.
pub fn configure(cfg: &mut web::ServiceConfig, table: &RouteTable) {
    for entry in table.entries() {
        let pattern = entry.pattern.as_str();
        match &entry.kind {
            RouteKind::StaticAssets(dir) => {
                cfg.service(actix_files::Files::new(pattern, dir));
            }
            RouteKind::ChannelInfo => {
                cfg.service(
                    web::resource(pattern)
                        .route(web::get().to(admin::channel_info))
                        .route(web::delete().to(admin::close_channel)),
                );
            }
            RouteKind::ChannelList if pattern.ends_with("{sender}") => {
                cfg.route(pattern, web::get().to(admin::list_sender_channels));
            }
            RouteKind::ChannelList => {
                cfg.route(pattern, web::get().to(admin::list_channels));
            }
            RouteKind::Admin => {
                cfg.route(pattern, web::get().to(admin::overview));
            }
            RouteKind::AdminCloseAll => {
                cfg.route(pattern, web::post().to(admin::close_all));
            }
            RouteKind::Management => {
                cfg.route(pattern, web::get().to(admin::management));
            }
            RouteKind::Health => {
                cfg.route(pattern, web::get().to(health::health));
            }
            RouteKind::Metrics => {
                cfg.route(pattern, web::get().to(health::metrics));
            }
            RouteKind::Content => {
                cfg.service(web::resource(pattern).to(paywall::serve));
            }
        }
    }
}
