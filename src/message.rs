//! RPC 消息信封
//!
//! 请求/响应共享同一消息形态：头部元数据 + 独占的一个消息体。
//! 信封只约束 "一个节点、一次调用" 的形状，线上编码不在本 crate 范围内。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息头部元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageHeader {
    /// 请求标识
    pub request_id: String,
    /// 目标服务名
    pub service_name: String,
    /// 目标服务版本
    pub version: String,
}

impl MessageHeader {
    pub fn new(
        request_id: impl Into<String>,
        service_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            service_name: service_name.into(),
            version: version.into(),
        }
    }
}

/// 请求消息体：方法名 + 参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestBody {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RequestBody {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// RPC 请求消息
///
/// 任一时刻只持有一个消息体，设置新消息体即替换旧的，不保留历史。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub header: MessageHeader,
    body: RequestBody,
}

impl RpcRequest {
    pub fn new(header: MessageHeader, body: RequestBody) -> Self {
        Self { header, body }
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// 设置消息体，替换之前持有的消息体
    pub fn set_body(&mut self, body: RequestBody) {
        self.body = body;
    }
}

/// 响应错误指示
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// 响应消息体：结果与错误互斥，由类型本身保证
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResponseBody {
    Ok(Value),
    Err(ResponseError),
}

/// RPC 响应消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub header: MessageHeader,
    body: ResponseBody,
}

impl RpcResponse {
    pub fn new(header: MessageHeader, body: ResponseBody) -> Self {
        Self { header, body }
    }

    /// 构造成功响应
    pub fn ok(header: MessageHeader, result: Value) -> Self {
        Self::new(header, ResponseBody::Ok(result))
    }

    /// 构造错误响应
    pub fn err(header: MessageHeader, code: i32, message: impl Into<String>) -> Self {
        Self::new(header, ResponseBody::Err(ResponseError::new(code, message)))
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// 设置消息体，替换之前持有的消息体
    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, ResponseBody::Ok(_))
    }
}
