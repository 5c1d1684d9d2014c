/// "Core" refers to the objects that own the device, the window target and the frame ring.
/// They create and drive everything under "Resources".

pub mod context;
pub mod device;
pub mod frame;
pub mod frame_loop;
pub mod immediate;
pub mod instance;
pub mod state;
pub mod target;
