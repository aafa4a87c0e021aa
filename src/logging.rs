// ==========================================
// 数据交换引擎 - 日志系统初始化
// ==========================================
// 使用 tracing 和 tracing-subscriber
// 引擎作为库被宿主引入时，由宿主决定是否调用 init
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=debug 或 RUST_LOG=data_exchange=trace
/// - DATA_EXCHANGE_LOG_FORMAT: text（默认）或 json
///
/// # 示例
/// ```no_run
/// use data_exchange::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // 批处理任务的日志通常进文件/采集器，支持 json 输出
    let json_format = std::env::var("DATA_EXCHANGE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_format {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .init();
    }
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
