//! ONNX Runtime推理后端
//!
//! 模型加载 + 运行时初始化 + 前向推理。
//! 原始输出不做任何解码, 解码由 postprocess 模块负责。

use anyhow::Result;
use ndarray::{Array, IxDyn};
use ort::{GraphOptimizationLevel, Session};

/// 推理后端统一接口
///
/// 引擎循环只依赖该trait; 生产环境使用 OrtBackend, 测试可注入桩实现。
pub trait InferenceBackend: Send {
    /// 前向推理: NCHW张量 → 模型原始输出张量列表 (按模型声明顺序)
    fn infer(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>>;
}

/// ONNX Runtime会话封装
pub struct OrtBackend {
    session: Session,
    output_names: Vec<String>,
}

impl OrtBackend {
    /// 加载模型并初始化运行时, 尽可能使用全部CPU核
    pub fn load(model_path: &str) -> Result<Self> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(model_path)?;
        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();
        log::info!("model {} loaded ({} intra-op threads)", model_path, threads);
        Ok(Self {
            session,
            output_names,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn infer(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let outputs = self.session.run(ort::inputs![input.view()]?)?;
        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let y = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            ys.push(y.to_owned());
        }
        Ok(ys)
    }
}
