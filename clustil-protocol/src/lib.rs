/*!
Clustil protocol - the vocabulary shared by the kernel and every viewer.

- `model`: nodes and their accelerator devices, with active/inactive variants
- `message`: the `full` / `delta` push messages carried over the event stream
- `memo`: the annotation write request and its acknowledgement
*/

pub mod memo;
pub mod message;
pub mod model;

pub use memo::{is_blank, MemoAck, MemoWrite};
pub use message::{DeltaData, DeviceDelta, MemoryDelta, NodeDelta, ServerMessage};
pub use model::{
    Device, DeviceKey, DeviceState, Editor, Memory, Metrics, ModelError, Node, NodeState, Snapshot,
};
