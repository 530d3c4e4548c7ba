// 进程基础设施：配置、日志、停机信号与共享状态。
pub mod config;
pub mod logging;
pub mod shutdown;
pub mod state;
