//! 摄像头采集模块
//!
//! 提供帧源统一接口与V4L2 USB摄像头实现。
//! 打开/读帧/释放/重开语义与引擎的故障恢复状态机对应。

use anyhow::Result;
use image::RgbImage;

/// 帧源统一接口
///
/// 引擎循环只依赖该trait: read() 阻塞等待一帧;
/// reopen() 释放底层句柄并对同一设备做一次重新打开。
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<RgbImage>;
    fn reopen(&mut self) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use self::v4l2::V4l2Camera;

#[cfg(target_os = "linux")]
mod v4l2 {
    use anyhow::{bail, Context, Result};
    use image::RgbImage;
    use ouroboros::self_referencing;
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::prelude::MmapStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use super::FrameSource;

    /// USB摄像头 (V4L2, 优先MJPG)
    pub struct V4l2Camera {
        camera_id: u32,
        width: u32,
        height: u32,
        active_fourcc: [u8; 4],
        active_width: u32,
        active_height: u32,
        state: Option<CameraState>,
    }

    #[self_referencing]
    struct CameraState {
        device: Device,
        #[borrows(mut device)]
        #[covariant]
        stream: MmapStream<'this>,
    }

    impl V4l2Camera {
        /// 打开 /dev/video{id} 并配置采集格式
        pub fn open(camera_id: u32, width: u32, height: u32) -> Result<Self> {
            let mut camera = Self {
                camera_id,
                width,
                height,
                active_fourcc: *b"MJPG",
                active_width: width,
                active_height: height,
                state: None,
            };
            camera.connect()?;
            Ok(camera)
        }

        fn connect(&mut self) -> Result<()> {
            let path = format!("/dev/video{}", self.camera_id);
            let device =
                Device::with_path(&path).with_context(|| format!("open camera {}", path))?;

            let mut format = device.format().context("read camera format")?;
            format.width = self.width;
            format.height = self.height;
            format.fourcc = FourCC::new(b"MJPG");
            let format = device.set_format(&format).context("configure camera format")?;

            if format.fourcc != FourCC::new(b"MJPG") && format.fourcc != FourCC::new(b"RGB3") {
                bail!(
                    "camera {} negotiated unsupported pixel format {}",
                    path,
                    String::from_utf8_lossy(&format.fourcc.repr)
                );
            }
            self.active_fourcc = format.fourcc.repr;
            self.active_width = format.width;
            self.active_height = format.height;

            let state = CameraStateTryBuilder {
                device,
                stream_builder: |device| {
                    MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|e| anyhow::Error::new(e).context("create capture stream"))
                },
            }
            .try_build()?;
            self.state = Some(state);

            log::info!(
                "camera {} opened ({}x{} {})",
                path,
                self.active_width,
                self.active_height,
                String::from_utf8_lossy(&self.active_fourcc)
            );
            Ok(())
        }
    }

    impl FrameSource for V4l2Camera {
        fn read(&mut self) -> Result<RgbImage> {
            let state = self.state.as_mut().context("camera not open")?;
            let raw = state
                .with_mut(|fields| {
                    fields
                        .stream
                        .next()
                        .map(|(buf, _meta)| buf.to_vec())
                })
                .context("capture frame")?;
            decode_frame(&raw, self.active_fourcc, self.active_width, self.active_height)
        }

        fn reopen(&mut self) -> Result<()> {
            // 先释放句柄 (drop关闭设备fd), 再对同一设备做一次重开
            self.state = None;
            self.connect()
        }
    }

    /// MJPG → JPEG解码, RGB3 → 直接拷贝
    fn decode_frame(buf: &[u8], fourcc: [u8; 4], width: u32, height: u32) -> Result<RgbImage> {
        if &fourcc == b"MJPG" {
            let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .context("decode mjpeg frame")?;
            Ok(img.to_rgb8())
        } else {
            RgbImage::from_raw(width, height, buf.to_vec()).context("raw frame size mismatch")
        }
    }
}
