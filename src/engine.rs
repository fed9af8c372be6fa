//! 引擎生命周期与采集推理循环
//!
//! DetectionEngine 是对外契约: start / stop / latest_frame / is_running。
//! 后台工作线程按 Starting → Capturing ⇄ Recovering → Stopped 状态机运行,
//! 停止标志只在迭代边界检查, 进行中的帧处理完才退出。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use image::RgbImage;
use ndarray::ArrayD;

use crate::annotate::Annotator;
use crate::capture::FrameSource;
use crate::config::EngineConfig;
use crate::letterbox::{Letterbox, LetterboxResult};
use crate::ort_backend::InferenceBackend;
use crate::postprocess;
use crate::publisher::{DetectionBatch, ResultPublisher};
use crate::{non_max_suppression, Detection};

/// 引擎生命周期状态
///
/// Stopping 表示停止请求已发出, 工作线程尚未退出;
/// 工作线程退出时回到 Idle。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;

/// 工作线程使用的采集/推理部件
///
/// start() 走生产路径 (V4L2摄像头 + OrtBackend);
/// start_with() 可注入其他实现, 故障恢复测试依赖该接缝。
pub struct EngineParts {
    pub source: Box<dyn FrameSource>,
    pub backend: Box<dyn InferenceBackend>,
}

struct EngineShared {
    state: AtomicU8,
    latest_frame: Mutex<Option<Arc<RgbImage>>>,
}

impl EngineShared {
    fn load_state(&self) -> EngineState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => EngineState::Running,
            STATE_STOPPING => EngineState::Stopping,
            _ => EngineState::Idle,
        }
    }
}

/// 检测引擎 (每实例至多一个后台循环)
pub struct DetectionEngine {
    shared: Arc<EngineShared>,
}

impl DetectionEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared {
                state: AtomicU8::new(STATE_IDLE),
                latest_frame: Mutex::new(None),
            }),
        }
    }

    /// 启动引擎 (生产部件)。已在运行或停止中则返回false, 状态不变。
    ///
    /// 立即返回, 不等待模型加载: 启动失败只能通过 is_running 变回 false 观测。
    pub fn start(&self, config: EngineConfig) -> bool {
        let parts_config = config.clone();
        self.start_with(config, move || open_production_parts(&parts_config))
    }

    /// 在Idle状态下启动后台循环, 部件由 `factory` 在工作线程的Starting阶段构建
    pub fn start_with<F>(&self, config: EngineConfig, factory: F) -> bool
    where
        F: FnOnce() -> Result<EngineParts> + Send + 'static,
    {
        if self
            .shared
            .state
            .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || inference_loop(shared, config, factory));
        true
    }

    /// 请求停止, 不阻塞等待循环退出 (最终一致)
    pub fn stop(&self) {
        let _ = self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.load_state() == EngineState::Running
    }

    pub fn state(&self) -> EngineState {
        self.shared.load_state()
    }

    /// 最近一帧标注图像; 第一帧处理完成前为None。
    /// 写入是整帧Arc替换, 读者不会看到半成品。
    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.shared
            .latest_frame
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn open_production_parts(config: &EngineConfig) -> Result<EngineParts> {
    let backend = crate::ort_backend::OrtBackend::load(&config.model_path)?;
    let source = crate::capture::V4l2Camera::open(
        config.camera_id,
        config.capture_width,
        config.capture_height,
    )?;
    Ok(EngineParts {
        source: Box::new(source),
        backend: Box::new(backend),
    })
}

#[cfg(not(target_os = "linux"))]
fn open_production_parts(config: &EngineConfig) -> Result<EngineParts> {
    anyhow::bail!(
        "camera {} unavailable: v4l2 capture requires linux",
        config.camera_id
    )
}

/// 采集推理循环的内部状态
enum LoopState {
    Capturing,
    Recovering,
    Stopped,
}

fn inference_loop<F>(shared: Arc<EngineShared>, config: EngineConfig, factory: F)
where
    F: FnOnce() -> Result<EngineParts>,
{
    // ---- Starting: 任何失败直接终止本次运行, 不重试 ----
    let EngineParts {
        mut source,
        mut backend,
    } = match factory() {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("engine startup failed: {:#}", e);
            shared.state.store(STATE_IDLE, Ordering::SeqCst);
            return;
        }
    };
    let publisher = match ResultPublisher::bind(&config.udp_host, config.udp_port) {
        Ok(p) => p,
        Err(e) => {
            log::error!("engine startup failed: {:#}", e);
            shared.state.store(STATE_IDLE, Ordering::SeqCst);
            return;
        }
    };
    let annotator = Annotator::new(config.font_path.as_deref());
    let letterbox = Letterbox::new(config.input_size);

    log::info!(
        "inference loop started (camera {}, publishing to {}:{})",
        config.camera_id,
        config.udp_host,
        config.udp_port
    );

    let mut frame_count: u64 = 0;
    let mut state = LoopState::Capturing;

    loop {
        match state {
            LoopState::Capturing => {
                // 停止标志每帧检查一次
                if shared.state.load(Ordering::SeqCst) != STATE_RUNNING {
                    state = LoopState::Stopped;
                    continue;
                }

                let mut frame = match source.read() {
                    Ok(frame) => frame,
                    Err(e) => {
                        // 设备级故障 → 恢复路径
                        log::warn!("frame acquisition failed: {:#}", e);
                        state = LoopState::Recovering;
                        continue;
                    }
                };
                let ts = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;

                // 帧内错误: 跳过该帧, 循环继续
                let lb = match letterbox.apply(&frame) {
                    Ok(lb) => lb,
                    Err(e) => {
                        log::warn!("preprocess failed: {:#}", e);
                        continue;
                    }
                };

                let outputs = match backend.infer(lb.to_tensor()) {
                    Ok(outputs) => outputs,
                    Err(e) => {
                        log::warn!("inference failed: {:#}", e);
                        continue;
                    }
                };

                match process_frame(&outputs, &lb, &config) {
                    Ok(detections) => {
                        annotator.draw(&mut frame, &detections);
                        let batch = DetectionBatch::new(&detections, ts);
                        if let Err(e) = publisher.publish(&batch) {
                            log::warn!("publish failed: {:#}", e);
                        }
                    }
                    // 解码失败: 未标注的原始帧仍进入共享槽
                    Err(e) => log::warn!("postprocess failed: {:#}", e),
                }

                if let Ok(mut slot) = shared.latest_frame.lock() {
                    *slot = Some(Arc::new(frame));
                }
                frame_count += 1;
                if frame_count % 100 == 0 {
                    log::info!("processed {} frames", frame_count);
                }
            }
            LoopState::Recovering => {
                // 释放句柄后对同一设备只做一次重开 (有意的快速失败策略)
                match source.reopen() {
                    Ok(()) => {
                        log::info!("capture source reopened, resuming");
                        state = LoopState::Capturing;
                    }
                    Err(e) => {
                        log::error!("capture source reopen failed: {:#}", e);
                        state = LoopState::Stopped;
                    }
                }
            }
            LoopState::Stopped => break,
        }
    }

    // ---- Stopped: 推理运行时与采集句柄随drop释放 ----
    drop(source);
    drop(backend);
    log::info!("inference loop ended after {} frames", frame_count);
    shared.state.store(STATE_IDLE, Ordering::SeqCst);
}

/// 单帧后处理: 解码融合 → 坐标还原 → NMS → 检测列表
fn process_frame(
    outputs: &[ArrayD<f32>],
    lb: &LetterboxResult,
    config: &EngineConfig,
) -> Result<Vec<Detection>> {
    let cands = postprocess::decode_outputs(outputs, config.input_size, config.conf_threshold)?;
    let boxes: Vec<[f32; 4]> = cands.boxes.iter().map(|b| lb.restore_box(*b)).collect();
    let keep = non_max_suppression(&boxes, &cands.scores, config.iou_threshold);

    Ok(keep
        .into_iter()
        .map(|i| Detection {
            class_id: cands.class_ids[i],
            confidence: cands.scores[i],
            x1: boxes[i][0],
            y1: boxes[i][1],
            x2: boxes[i][2],
            y2: boxes[i][3],
        })
        .collect())
}
