// Capability matching - the decision logic of setup
//
// Pure functions over data queried from the driver. Nothing here calls Vulkan,
// so every policy can be tested with hand-built candidates.

pub mod device;
pub mod features;
pub mod surface;

pub use device::{
    assign_queue_families, evaluate, resolve_names, select_device, DeviceCandidate, DeviceRequirement,
    DeviceSelection, DeviceTypes, NameMatch, Qualification, QueueFamilyAssignment, QueueFamilyCaps, QueueRole,
    Rejection,
};
pub use surface::{
    image_count, resolve_extent, select_format, select_present_mode, select_surface, SurfacePreference,
    SurfaceSelection,
};
