//! 引擎配置参数

/// 检测置信度阈值
pub const OBJ_THRESH: f32 = 0.25;
/// NMS重叠阈值
pub const NMS_THRESH: f32 = 0.45;
/// 模型输入尺寸 (正方形边长)
pub const IMG_SIZE: u32 = 640;

/// 引擎启动配置
///
/// 全部参数在 start() 时一次性传入, 默认值与部署约定一致:
/// 打包模型路径 + 0号摄像头 + 本机回环UDP推送。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 模型文件路径 (ONNX多分支导出)
    pub model_path: String,
    /// 摄像头设备编号 (/dev/video{N})
    pub camera_id: u32,
    /// 检测结果UDP推送主机
    pub udp_host: String,
    /// 检测结果UDP推送端口
    pub udp_port: u16,
    /// 置信度阈值
    pub conf_threshold: f32,
    /// NMS重叠阈值
    pub iou_threshold: f32,
    /// 模型输入尺寸
    pub input_size: u32,
    /// 摄像头采集分辨率
    pub capture_width: u32,
    pub capture_height: u32,
    /// 标签字体文件, 缺省时只画框不画文字
    pub font_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolo11n.onnx".to_string(),
            camera_id: 0,
            udp_host: "127.0.0.1".to_string(),
            udp_port: 8080,
            conf_threshold: OBJ_THRESH,
            iou_threshold: NMS_THRESH,
            input_size: IMG_SIZE,
            capture_width: 640,
            capture_height: 480,
            font_path: None,
        }
    }
}
