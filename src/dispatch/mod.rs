mod bridge;

pub use bridge::{dispatch_bridge, BridgeError, DispatchBridge, UtteranceReceiver, UtteranceResult};
