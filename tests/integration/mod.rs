//! 集成测试模块
//!
//! 需要外部服务的测试
