//! App - バックグラウンド処理
//!
//! # 主要コンポーネント
//! - **Sweeper**: 期限切れ lease を retry queue に戻す定期ループ

pub mod sweeper;

pub use self::sweeper::Sweeper;
