// Physical device and queue family selection
//
// Works on plain data (`DeviceCandidate`) so the policy can be exercised
// without a Vulkan driver. `backend::device` does the querying.

use ash::vk;
use bitflags::bitflags;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use super::features::missing_features;
use crate::error::SetupError;

bitflags! {
    /// Device type categories a requirement accepts
    pub struct DeviceTypes: u8 {
        const OTHER = 1 << 0;
        const INTEGRATED_GPU = 1 << 1;
        const DISCRETE_GPU = 1 << 2;
        const VIRTUAL_GPU = 1 << 3;
        const CPU = 1 << 4;
    }
}

impl DeviceTypes {
    pub fn from_vk(device_type: vk::PhysicalDeviceType) -> Option<Self> {
        match device_type {
            vk::PhysicalDeviceType::OTHER => Some(Self::OTHER),
            vk::PhysicalDeviceType::INTEGRATED_GPU => Some(Self::INTEGRATED_GPU),
            vk::PhysicalDeviceType::DISCRETE_GPU => Some(Self::DISCRETE_GPU),
            vk::PhysicalDeviceType::VIRTUAL_GPU => Some(Self::VIRTUAL_GPU),
            vk::PhysicalDeviceType::CPU => Some(Self::CPU),
            _ => None,
        }
    }
}

/// The roles a queue family can be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
    SparseBinding,
    Present,
}

impl QueueRole {
    pub const ALL: [QueueRole; 5] = [
        QueueRole::Graphics,
        QueueRole::Compute,
        QueueRole::Transfer,
        QueueRole::SparseBinding,
        QueueRole::Present,
    ];

    /// Whether a family with these capabilities can serve this role
    pub fn supported_by(self, family: &QueueFamilyCaps) -> bool {
        match self {
            QueueRole::Graphics => family.flags.contains(vk::QueueFlags::GRAPHICS),
            QueueRole::Compute => family.flags.contains(vk::QueueFlags::COMPUTE),
            QueueRole::Transfer => family.flags.contains(vk::QueueFlags::TRANSFER),
            QueueRole::SparseBinding => family.flags.contains(vk::QueueFlags::SPARSE_BINDING),
            QueueRole::Present => family.present,
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Compute => "compute",
            QueueRole::Transfer => "transfer",
            QueueRole::SparseBinding => "sparse_binding",
            QueueRole::Present => "present",
        };
        f.write_str(name)
    }
}

/// How a required extension or layer name is compared with an available one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMatch {
    #[default]
    Exact,
    /// The required name only has to be a prefix of the available name
    Prefix,
}

impl NameMatch {
    pub fn matches(self, required: &str, available: &str) -> bool {
        match self {
            NameMatch::Exact => required == available,
            NameMatch::Prefix => available.starts_with(required),
        }
    }
}

/// Resolve every required name against the available ones.
///
/// Returns the available name each requirement matched, in required order and
/// without duplicates; these are the names to pass to Vulkan. An exact match
/// is preferred over a prefix match, then enumeration order decides. If any
/// requirement is unmatched, returns all unmatched names instead.
pub fn resolve_names<R, A>(required: &[R], available: &[A], policy: NameMatch) -> Result<Vec<String>, Vec<String>>
where
    R: AsRef<str>,
    A: AsRef<str>,
{
    let mut matched: Vec<String> = Vec::with_capacity(required.len());
    let mut missing = Vec::new();

    for req in required.iter().map(AsRef::as_ref) {
        let found = available
            .iter()
            .map(AsRef::as_ref)
            .find(|av| *av == req)
            .or_else(|| available.iter().map(AsRef::as_ref).find(|av| policy.matches(req, av)));

        match found {
            Some(name) if matched.iter().any(|m| m == name) => {}
            Some(name) => matched.push(name.to_owned()),
            None => missing.push(req.to_owned()),
        }
    }

    if missing.is_empty() {
        Ok(matched)
    } else {
        Err(missing)
    }
}

/// Everything a device must offer to be selected
#[derive(Debug, Clone)]
pub struct DeviceRequirement {
    pub types: DeviceTypes,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<String>,
    pub extension_match: NameMatch,
    pub queues: BTreeSet<QueueRole>,
}

impl Default for DeviceRequirement {
    fn default() -> Self {
        Self {
            types: DeviceTypes::all(),
            features: vk::PhysicalDeviceFeatures::default(),
            extensions: Vec::new(),
            extension_match: NameMatch::Exact,
            queues: BTreeSet::new(),
        }
    }
}

/// Capabilities of one queue family on a candidate
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyCaps {
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the target surface
    pub present: bool,
}

/// A physical device as reported by enumeration
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamilyCaps>,
}

/// Queue family index chosen for each role, if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    families: BTreeMap<QueueRole, u32>,
}

impl QueueFamilyAssignment {
    pub fn get(&self, role: QueueRole) -> Option<u32> {
        self.families.get(&role).copied()
    }

    pub fn is_found(&self, role: QueueRole) -> bool {
        self.families.contains_key(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueueRole, u32)> + '_ {
        self.families.iter().map(|(&role, &index)| (role, index))
    }

    /// Distinct family indices in ascending order
    pub fn unique_families(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.families.values().copied().collect();
        set.into_iter().collect()
    }
}

/// Why a candidate was turned down
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("device type {0:?} not accepted")]
    DeviceType(vk::PhysicalDeviceType),
    #[error("missing features {0:?}")]
    MissingFeatures(Vec<&'static str>),
    #[error("missing extensions {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("no queue family for {0:?}")]
    MissingQueueRoles(Vec<QueueRole>),
}

/// The device picked by `select_device`
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    /// Position in the candidate list
    pub index: usize,
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyAssignment,
    /// Features to enable on the logical device
    pub features: vk::PhysicalDeviceFeatures,
    /// Extension names as the device reports them
    pub extensions: Vec<String>,
}

/// What an accepted candidate offers for the requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualification {
    pub queue_families: QueueFamilyAssignment,
    /// Device extension names that satisfied the required ones
    pub extensions: Vec<String>,
}

/// Map each role in `roles` to a queue family, using as few families as possible.
///
/// The smallest set of families that serves every reachable role is chosen;
/// among sets of equal size the one with the lowest indices wins. Each role
/// then goes to the lowest-index family of that set supporting it. Roles no
/// family supports stay unassigned.
pub fn assign_queue_families(families: &[QueueFamilyCaps], roles: &BTreeSet<QueueRole>) -> QueueFamilyAssignment {
    let mut assignment = QueueFamilyAssignment::default();

    let reachable: Vec<QueueRole> = roles
        .iter()
        .copied()
        .filter(|role| families.iter().any(|family| role.supported_by(family)))
        .collect();
    if reachable.is_empty() {
        return assignment;
    }

    // Bit i set when the family serves reachable[i]
    let masks: Vec<u8> = families
        .iter()
        .map(|family| {
            reachable
                .iter()
                .enumerate()
                .filter(|(_, role)| role.supported_by(family))
                .fold(0u8, |mask, (bit, _)| mask | (1u8 << bit))
        })
        .collect();
    let target = (1u8 << reachable.len()) - 1;

    let mut cover = Vec::new();
    let found = (1..=reachable.len()).any(|size| {
        cover.clear();
        find_cover(&masks, target, size, 0, 0, &mut cover)
    });
    if !found {
        return assignment;
    }

    for (bit, role) in reachable.iter().enumerate() {
        if let Some(&index) = cover.iter().find(|&&index| masks[index] & (1u8 << bit) != 0) {
            assignment.families.insert(*role, index as u32);
        }
    }

    assignment
}

/// Depth-first search for the lexicographically first `size` families whose
/// masks together cover `target`. Families adding nothing new are skipped.
fn find_cover(masks: &[u8], target: u8, size: usize, start: usize, covered: u8, chosen: &mut Vec<usize>) -> bool {
    if chosen.len() == size {
        return covered == target;
    }

    for index in start..masks.len() {
        if masks[index] & !covered == 0 {
            continue;
        }
        chosen.push(index);
        if find_cover(masks, target, size, index + 1, covered | masks[index], chosen) {
            return true;
        }
        chosen.pop();
    }

    false
}

/// Check one candidate against the requirement.
///
/// Checks run in a fixed order (type, features, extensions, queues) and the
/// first failing check is reported.
pub fn evaluate(candidate: &DeviceCandidate, requirement: &DeviceRequirement) -> Result<Qualification, Rejection> {
    let accepted = DeviceTypes::from_vk(candidate.device_type)
        .map_or(false, |ty| requirement.types.contains(ty));
    if !accepted {
        return Err(Rejection::DeviceType(candidate.device_type));
    }

    let features = missing_features(&requirement.features, &candidate.features);
    if !features.is_empty() {
        return Err(Rejection::MissingFeatures(features));
    }

    let extensions = resolve_names(
        &requirement.extensions,
        &candidate.extensions,
        requirement.extension_match,
    )
    .map_err(Rejection::MissingExtensions)?;

    let assignment = assign_queue_families(&candidate.queue_families, &requirement.queues);
    let roles: Vec<QueueRole> = requirement
        .queues
        .iter()
        .copied()
        .filter(|role| !assignment.is_found(*role))
        .collect();
    if !roles.is_empty() {
        return Err(Rejection::MissingQueueRoles(roles));
    }

    Ok(Qualification {
        queue_families: assignment,
        extensions,
    })
}

/// Pick the first candidate, in enumeration order, that meets the requirement
pub fn select_device(
    candidates: &[DeviceCandidate],
    requirement: &DeviceRequirement,
) -> Result<DeviceSelection, SetupError> {
    let mut rejections = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        match evaluate(candidate, requirement) {
            Ok(Qualification {
                queue_families,
                extensions,
            }) => {
                log::info!("Selected physical device {}: {}", index, candidate.name);
                return Ok(DeviceSelection {
                    index,
                    handle: candidate.handle,
                    name: candidate.name.clone(),
                    device_type: candidate.device_type,
                    queue_families,
                    features: requirement.features,
                    extensions,
                });
            }
            Err(rejection) => {
                log::debug!("Rejected physical device {} ({}): {}", index, candidate.name, rejection);
                rejections.push((candidate.name.clone(), rejection));
            }
        }
    }

    log::debug!("No physical device meets the requirement");
    Err(SetupError::NoSuitableDevice(rejections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyCaps {
        QueueFamilyCaps { flags, present }
    }

    fn candidate(raw: u64, device_type: vk::PhysicalDeviceType, families: Vec<QueueFamilyCaps>) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("device-{}", raw),
            device_type,
            features: vk::PhysicalDeviceFeatures::default(),
            extensions: vec!["VK_KHR_swapchain".to_string()],
            queue_families: families,
        }
    }

    fn graphics_present() -> BTreeSet<QueueRole> {
        [QueueRole::Graphics, QueueRole::Present].into_iter().collect()
    }

    fn roles(list: &[QueueRole]) -> BTreeSet<QueueRole> {
        list.iter().copied().collect()
    }

    fn every_role() -> BTreeSet<QueueRole> {
        QueueRole::ALL.into_iter().collect()
    }

    #[test]
    fn single_family_serves_every_requested_role() {
        let requested = roles(&[QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer, QueueRole::Present]);
        let assignment = assign_queue_families(
            &[family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, true)],
            &requested,
        );
        assert_eq!(assignment.get(QueueRole::Graphics), Some(0));
        assert_eq!(assignment.get(QueueRole::Compute), Some(0));
        assert_eq!(assignment.get(QueueRole::Transfer), Some(0));
        assert_eq!(assignment.get(QueueRole::Present), Some(0));
        assert_eq!(assignment.get(QueueRole::SparseBinding), None);
        assert_eq!(assignment.unique_families(), vec![0]);
    }

    #[test]
    fn unrequested_roles_do_not_pull_in_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::GRAPHICS, true),
            family(vk::QueueFlags::SPARSE_BINDING, false),
        ];
        let assignment = assign_queue_families(&families, &graphics_present());
        assert_eq!(assignment.get(QueueRole::Graphics), Some(1));
        assert_eq!(assignment.get(QueueRole::Present), Some(1));
        assert_eq!(assignment.get(QueueRole::Compute), None);
        assert_eq!(assignment.get(QueueRole::SparseBinding), None);
        assert_eq!(assignment.unique_families(), vec![1]);
    }

    #[test]
    fn fewest_families_even_when_a_broad_family_comes_first() {
        // Taking family 0 first would need three families; 1 and 2 cover everything.
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING, true),
        ];
        let assignment = assign_queue_families(&families, &every_role());
        assert_eq!(assignment.unique_families(), vec![1, 2]);
        assert_eq!(assignment.get(QueueRole::Graphics), Some(1));
        assert_eq!(assignment.get(QueueRole::Compute), Some(1));
        assert_eq!(assignment.get(QueueRole::Present), Some(1));
        assert_eq!(assignment.get(QueueRole::Transfer), Some(2));
        assert_eq!(assignment.get(QueueRole::SparseBinding), Some(2));
    }

    #[test]
    fn present_only_family_fills_the_gap() {
        let assignment = assign_queue_families(
            &[
                family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
                family(vk::QueueFlags::empty(), true),
            ],
            &roles(&[QueueRole::Graphics, QueueRole::Transfer, QueueRole::Present]),
        );
        assert_eq!(assignment.get(QueueRole::Graphics), Some(0));
        assert_eq!(assignment.get(QueueRole::Transfer), Some(0));
        assert_eq!(assignment.get(QueueRole::Present), Some(1));
        assert_eq!(assignment.unique_families(), vec![0, 1]);
    }

    #[test]
    fn ties_go_to_the_lowest_indices() {
        let caps = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true);
        let assignment = assign_queue_families(&[caps, caps, caps], &every_role());
        assert_eq!(assignment.unique_families(), vec![0]);

        let split = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::empty(), true),
            family(vk::QueueFlags::empty(), true),
        ];
        let assignment = assign_queue_families(&split, &graphics_present());
        assert_eq!(assignment.unique_families(), vec![0, 2]);
    }

    #[test]
    fn unsupported_role_leaves_the_others_assigned() {
        let assignment = assign_queue_families(
            &[family(vk::QueueFlags::GRAPHICS, true)],
            &roles(&[QueueRole::Graphics, QueueRole::SparseBinding]),
        );
        assert_eq!(assignment.get(QueueRole::Graphics), Some(0));
        assert!(!assignment.is_found(QueueRole::SparseBinding));
    }

    #[test]
    fn no_families_means_no_roles() {
        let assignment = assign_queue_families(&[], &every_role());
        assert!(assignment.iter().next().is_none());
    }

    #[test]
    fn rejects_wrong_device_type() {
        let requirement = DeviceRequirement {
            types: DeviceTypes::DISCRETE_GPU,
            ..Default::default()
        };
        let device = candidate(1, vk::PhysicalDeviceType::INTEGRATED_GPU, vec![]);
        assert_eq!(
            evaluate(&device, &requirement),
            Err(Rejection::DeviceType(vk::PhysicalDeviceType::INTEGRATED_GPU))
        );
    }

    #[test]
    fn type_check_runs_before_feature_check() {
        let mut requirement = DeviceRequirement {
            types: DeviceTypes::CPU,
            ..Default::default()
        };
        requirement.features.geometry_shader = vk::TRUE;
        let device = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU, vec![]);
        assert!(matches!(evaluate(&device, &requirement), Err(Rejection::DeviceType(_))));
    }

    #[test]
    fn prefix_policy_resolves_to_the_available_name() {
        let available = ["VK_KHR_swapchain_mutable_format"];
        assert_eq!(
            resolve_names(&["VK_KHR_swapchain"], &available, NameMatch::Exact),
            Err(vec!["VK_KHR_swapchain".to_string()])
        );
        assert_eq!(
            resolve_names(&["VK_KHR_swapchain"], &available, NameMatch::Prefix),
            Ok(vec!["VK_KHR_swapchain_mutable_format".to_string()])
        );
    }

    #[test]
    fn exact_name_beats_an_earlier_prefix_match() {
        let available = ["VK_KHR_swapchain_mutable_format", "VK_KHR_swapchain"];
        assert_eq!(
            resolve_names(&["VK_KHR_swapchain"], &available, NameMatch::Prefix),
            Ok(vec!["VK_KHR_swapchain".to_string()])
        );
    }

    #[test]
    fn resolved_names_are_not_repeated() {
        let available = ["VK_KHR_swapchain"];
        assert_eq!(
            resolve_names(&["VK_KHR_swap", "VK_KHR_swapchain"], &available, NameMatch::Prefix),
            Ok(vec!["VK_KHR_swapchain".to_string()])
        );
    }

    #[test]
    fn extension_order_does_not_matter() {
        let available = ["VK_KHR_maintenance1", "VK_KHR_swapchain"];
        let required = ["VK_KHR_swapchain", "VK_KHR_maintenance1"];
        assert_eq!(
            resolve_names(&required, &available, NameMatch::Exact),
            Ok(vec!["VK_KHR_swapchain".to_string(), "VK_KHR_maintenance1".to_string()])
        );
    }

    #[test]
    fn selection_carries_the_matched_extension_name() {
        let requirement = DeviceRequirement {
            extensions: vec!["VK_KHR_swap".into()],
            extension_match: NameMatch::Prefix,
            ..Default::default()
        };
        let device = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU, vec![]);
        let selection = select_device(&[device], &requirement).unwrap();
        assert_eq!(selection.extensions, vec!["VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn rejects_missing_extension() {
        let requirement = DeviceRequirement {
            extensions: vec!["VK_KHR_swapchain".into(), "VK_KHR_ray_query".into()],
            ..Default::default()
        };
        let device = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU, vec![]);
        assert_eq!(
            evaluate(&device, &requirement),
            Err(Rejection::MissingExtensions(vec!["VK_KHR_ray_query".into()]))
        );
    }

    #[test]
    fn rejects_missing_queue_role() {
        let requirement = DeviceRequirement {
            queues: graphics_present(),
            ..Default::default()
        };
        let device = candidate(
            1,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vec![family(vk::QueueFlags::GRAPHICS, false)],
        );
        assert_eq!(
            evaluate(&device, &requirement),
            Err(Rejection::MissingQueueRoles(vec![QueueRole::Present]))
        );
    }

    #[test]
    fn first_acceptable_candidate_wins() {
        let requirement = DeviceRequirement {
            queues: graphics_present(),
            ..Default::default()
        };
        let caps = family(vk::QueueFlags::GRAPHICS, true);
        let candidates = vec![
            candidate(1, vk::PhysicalDeviceType::INTEGRATED_GPU, vec![caps]),
            candidate(2, vk::PhysicalDeviceType::DISCRETE_GPU, vec![caps]),
        ];

        let selection = select_device(&candidates, &requirement).unwrap();
        assert_eq!(selection.index, 0);
        assert_eq!(selection.handle, vk::PhysicalDevice::from_raw(1));
    }

    #[test]
    fn selection_is_deterministic() {
        let requirement = DeviceRequirement {
            queues: graphics_present(),
            ..Default::default()
        };
        let candidates = vec![
            candidate(1, vk::PhysicalDeviceType::CPU, vec![family(vk::QueueFlags::COMPUTE, false)]),
            candidate(
                2,
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vec![
                    family(vk::QueueFlags::TRANSFER, false),
                    family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
                ],
            ),
        ];

        let first = select_device(&candidates, &requirement).unwrap();
        let second = select_device(&candidates, &requirement).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.index, second.index);
        assert_eq!(first.queue_families, second.queue_families);
    }

    #[test]
    fn failure_lists_every_rejection() {
        let requirement = DeviceRequirement {
            types: DeviceTypes::VIRTUAL_GPU,
            ..Default::default()
        };
        let candidates = vec![
            candidate(1, vk::PhysicalDeviceType::CPU, vec![]),
            candidate(2, vk::PhysicalDeviceType::DISCRETE_GPU, vec![]),
        ];

        match select_device(&candidates, &requirement) {
            Err(SetupError::NoSuitableDevice(rejections)) => {
                assert_eq!(rejections.len(), 2);
                assert_eq!(rejections[0].0, "device-1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_candidate_list_fails() {
        let result = select_device(&[], &DeviceRequirement::default());
        assert!(matches!(result, Err(SetupError::NoSuitableDevice(r)) if r.is_empty()));
    }
}
