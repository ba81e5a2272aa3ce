//! leaseq-server
//!
//! HTTP surface for `leaseq-core`.
//!
//! # モジュール構成
//! - **config**: CLI フラグ / 環境変数
//! - **api**: axum ルーターとハンドラ

pub mod api;
pub mod config;
