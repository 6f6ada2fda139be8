pub mod loopback;
pub mod pusher;
pub mod webrtc_transport;
