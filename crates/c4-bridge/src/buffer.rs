//! 原生字节缓冲与托管字节之间的转换。
//!
//! # 教案式说明
//! - **意图 (Why)**：入站数据由原生引擎分配。若原生侧把缓冲标记为“可转移”，托管侧直接接管内存，
//!   省去一次拷贝；否则托管侧只能拷贝，原生内存仍由原生析构钩子释放；
//! - **契约 (What)**：
//!   - 原生析构钩子至多运行一次，且对已转移的缓冲永不运行；
//!   - 转移后缓冲被“毒化”，[`NativeBuffer::native_view`] 返回不变量错误，用于在测试中捕获 use-after-transfer；
//! - **风险 (Trade-offs)**：借用型缓冲在确认接收前一直占用原生内存，其释放时机由生命周期协调器控制。

use core::fmt;

use bytes::Bytes;

use crate::error::BridgeError;

/// 缓冲所有权模式。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ownership {
    /// 所有权可整体移交托管侧。
    Transferable,
    /// 原生侧保留所有权，托管侧必须拷贝。
    Borrowed,
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// 原生引擎交给桥接层的一段字节。
pub struct NativeBuffer {
    data: Option<Vec<u8>>,
    ownership: Ownership,
    release: Option<ReleaseHook>,
}

impl NativeBuffer {
    /// 构造可转移缓冲。
    pub fn transferable(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ownership: Ownership::Transferable,
            release: None,
        }
    }

    /// 构造借用型缓冲，托管侧只能拷贝。
    pub fn borrowed(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ownership: Ownership::Borrowed,
            release: None,
        }
    }

    /// 挂接原生析构钩子；缓冲在原生侧被释放时调用一次。
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// 缓冲长度；已转移的缓冲长度为 `0`。
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有权是否已移交托管侧。
    pub fn is_transferred(&self) -> bool {
        self.data.is_none()
    }

    /// 原生侧视角读取缓冲内容。
    ///
    /// 已转移的缓冲返回 [`BridgeError::InvariantViolation`]。
    pub fn native_view(&self) -> Result<&[u8], BridgeError> {
        self.data
            .as_deref()
            .ok_or_else(|| BridgeError::InvariantViolation {
                handle: None,
                detail: "native buffer read after ownership transfer".to_owned(),
            })
    }

    /// 产出托管侧字节。
    ///
    /// # 执行逻辑（How）
    /// 1. 已转移的缓冲直接拒绝；
    /// 2. 可转移缓冲：取出 `Vec` 零拷贝包装为 [`Bytes`]，丢弃析构钩子（内存已归托管侧），缓冲被毒化；
    /// 3. 借用型缓冲：拷贝内容，原生内存保持不变，析构钩子留到缓冲被丢弃时运行。
    pub fn transfer_to_managed(&mut self) -> Result<Bytes, BridgeError> {
        match self.ownership {
            Ownership::Transferable => {
                let data = self.data.take().ok_or_else(|| BridgeError::InvariantViolation {
                    handle: None,
                    detail: "native buffer transferred twice".to_owned(),
                })?;
                self.release = None;
                Ok(Bytes::from(data))
            }
            Ownership::Borrowed => self.native_view().map(Bytes::copy_from_slice),
        }
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("len", &self.len())
            .field("ownership", &self.ownership)
            .field("transferred", &self.is_transferred())
            .finish()
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook_counter = Arc::clone(&counter);
        (counter, move || {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn transferable_moves_without_running_native_destructor() {
        let (released, hook) = counting_hook();
        let mut buffer = NativeBuffer::transferable(vec![1u8, 2, 3]).with_release(hook);
        let bytes = buffer.transfer_to_managed().expect("首次转移必须成功");
        assert_eq!(&bytes[..], &[1, 2, 3]);
        assert!(buffer.is_transferred());
        assert!(buffer.native_view().is_err(), "转移后原生视图必须被毒化");
        assert!(buffer.transfer_to_managed().is_err());
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn borrowed_copies_and_releases_once() {
        let (released, hook) = counting_hook();
        let mut buffer = NativeBuffer::borrowed(b"hello".to_vec()).with_release(hook);
        let bytes = buffer.transfer_to_managed().expect("借用型缓冲可重复拷贝");
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(buffer.native_view().expect("原生视图仍然有效"), b"hello");
        assert_eq!(buffer.len(), 5);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
