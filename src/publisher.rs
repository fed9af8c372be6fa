//! UDP检测结果推送
//!
//! 线上格式: 4字节大端长度头 + JSON负载。
//! 尽力而为: 不重试, 不缓存未发出的批次, 每帧结果相互独立。

use std::net::UdpSocket;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classes::class_name;
use crate::Detection;

/// 单条检测记录 (下游消费者schema)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class: String,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

/// 单帧检测批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub count: usize,
    pub results: Vec<DetectionRecord>,
    /// 采集时间戳, 秒 (Unix epoch)
    pub ts: f64,
}

impl DetectionBatch {
    /// 从NMS后的检测构建批次
    pub fn new(detections: &[Detection], ts: f64) -> Self {
        Self {
            count: detections.len(),
            results: detections
                .iter()
                .map(|d| DetectionRecord {
                    class: class_name(d.class_id).to_string(),
                    bbox: [d.x1, d.y1, d.x2, d.y2],
                })
                .collect(),
            ts,
        }
    }

    /// 编码为线上格式
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self).context("serialize detection batch")?;
        let mut payload = Vec::with_capacity(4 + body.len());
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(&body);
        Ok(payload)
    }
}

/// UDP推送器
///
/// socket在引擎启动时绑定一次, 随引擎存活。
/// publish() 返回Result, 失败由调用方记录日志后继续下一帧。
pub struct ResultPublisher {
    socket: UdpSocket,
    host: String,
    port: u16,
}

impl ResultPublisher {
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("bind udp socket")?;
        Ok(Self {
            socket,
            host: host.to_string(),
            port,
        })
    }

    /// 把一帧的检测批次作为单个数据报发出
    pub fn publish(&self, batch: &DetectionBatch) -> Result<usize> {
        let payload = batch.encode()?;
        self.socket
            .send_to(&payload, (self.host.as_str(), self.port))
            .with_context(|| format!("send to {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> DetectionBatch {
        let detections = [
            Detection {
                class_id: 0,
                confidence: 0.9,
                x1: 1.0,
                y1: 2.0,
                x2: 3.0,
                y2: 4.0,
            },
            Detection {
                class_id: 2,
                confidence: 0.7,
                x1: 10.0,
                y1: 20.0,
                x2: 30.0,
                y2: 40.0,
            },
        ];
        DetectionBatch::new(&detections, 1700000000.5)
    }

    #[test]
    fn test_batch_carries_labels_and_boxes() {
        let batch = sample_batch();
        assert_eq!(batch.count, 2);
        assert_eq!(batch.results[0].class, "person");
        assert_eq!(batch.results[1].class, "car");
        assert_eq!(batch.results[1].bbox, [10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_encode_prefixes_big_endian_length() {
        let batch = sample_batch();
        let payload = batch.encode().unwrap();
        let len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        assert_eq!(len, payload.len() - 4);

        // JSON负载可自描述地还原
        let decoded: DetectionBatch = serde_json::from_slice(&payload[4..]).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_wire_field_names_match_schema() {
        let batch = sample_batch();
        let json: serde_json::Value = serde_json::from_slice(&batch.encode().unwrap()[4..]).unwrap();
        assert!(json.get("count").is_some());
        assert!(json.get("ts").is_some());
        assert!(json["results"][0].get("class").is_some());
        assert!(json["results"][0].get("box").is_some());
    }

    #[test]
    fn test_publish_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();

        let publisher = ResultPublisher::bind("127.0.0.1", port).unwrap();
        let batch = sample_batch();
        let sent = publisher.publish(&batch).unwrap();

        let mut buf = [0u8; 65536];
        let received = receiver.recv(&mut buf).unwrap();
        assert_eq!(sent, received);

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let decoded: DetectionBatch = serde_json::from_slice(&buf[4..4 + len]).unwrap();
        assert_eq!(decoded, batch);
    }
}
