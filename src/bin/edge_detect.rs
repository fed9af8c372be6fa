//! 边缘检测服务进程入口
//!
//! 解析命令行 → 启动检测引擎 → 轮询运行状态。
//! 引擎故障没有推送通知, 只能通过 is_running 观测 (与控制面约定一致)。

use clap::Parser;
use yolov11_edge::config::{NMS_THRESH, OBJ_THRESH};
use yolov11_edge::{DetectionEngine, EngineConfig};

/// YOLOv11 边缘目标检测服务
#[derive(Parser, Debug)]
#[command(author, version, about = "YOLOv11边缘目标检测服务", long_about = None)]
struct Args {
    /// 模型文件路径 (ONNX多分支导出)
    #[arg(long, default_value = "models/yolo11n.onnx")]
    model_path: String,

    /// 摄像头设备编号 (/dev/video{N})
    #[arg(long, default_value_t = 0)]
    camera_id: u32,

    /// 检测结果UDP推送主机
    #[arg(long, default_value = "127.0.0.1")]
    udp_host: String,

    /// 检测结果UDP推送端口
    #[arg(long, default_value_t = 8080)]
    udp_port: u16,

    /// 置信度阈值
    #[arg(long, default_value_t = OBJ_THRESH)]
    conf: f32,

    /// NMS重叠阈值
    #[arg(long, default_value_t = NMS_THRESH)]
    iou: f32,

    /// 标签字体文件 (缺省时只画框不画文字)
    #[arg(long)]
    font: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("🚀 YOLOv11 边缘检测服务启动");
    println!("📦 模型: {}", args.model_path);
    println!("📷 摄像头: /dev/video{}", args.camera_id);
    println!("📡 UDP推送: {}:{}", args.udp_host, args.udp_port);
    println!();

    let config = EngineConfig {
        model_path: args.model_path,
        camera_id: args.camera_id,
        udp_host: args.udp_host,
        udp_port: args.udp_port,
        conf_threshold: args.conf,
        iou_threshold: args.iou,
        font_path: args.font,
        ..EngineConfig::default()
    };

    let engine = DetectionEngine::new();
    if !engine.start(config) {
        eprintln!("❌ 引擎启动请求被拒绝");
        std::process::exit(1);
    }

    // 启动是异步的: 模型加载或摄像头打开失败只会表现为 is_running 变回 false
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        if !engine.is_running() {
            eprintln!("⚠️ 推理循环已退出");
            std::process::exit(1);
        }
    }
}
