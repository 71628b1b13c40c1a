//! HTTP 接口层
//!
//! - `POST /api/search`：按主题检索论文
//! - `POST /api/generate`：完整运行一次流水线，返回运行摘要与想法
//! - `GET /api/health`：健康检查

pub mod routes;

pub use routes::{router, serve, ApiState};
