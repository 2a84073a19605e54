/*!
Clustil viewer - client side of the fleet dashboard.

- `reconciler`: local mirror of the fleet, full/delta merge, edit shielding
- `edit`: per-device memo edit state machine
- `viewer`: the two above kept in step, plus the async submit path
- `transport`: event-stream client with fixed-delay reconnect
- `writer`: memo writers for the kernel API
- `legacy`: socket.io row-table source and form writer for the legacy status server
- `console`, `config`: command line front end
*/

pub mod config;
pub mod console;
pub mod edit;
pub mod legacy;
pub mod reconciler;
pub mod transport;
pub mod viewer;
pub mod writer;

pub use edit::{EditSession, EditState};
pub use legacy::{LegacyAdapter, LegacyAnnotationWriter, LegacyError};
pub use reconciler::{ConnectionStatus, Reconciler};
pub use transport::{spawn_stream, SseDecoder, StreamHandle, RECONNECT_DELAY};
pub use viewer::{EditController, SharedViewer, SubmitOutcome, Viewer};
pub use writer::{AnnotationWriter, HttpAnnotationWriter, WriteError};
