//! Folding the registry's flat node list into physical devices.
//!
//! A composite camera exposes one capture node per USB interface. The
//! registry lists them one after another, so consecutive nodes with the same
//! vendor/product ids and distinct interfaces belong to the same device. A
//! repeated interface number starts the next device of the same model.

use std::collections::HashSet;

use crate::error::UvcError;
use crate::registry::UsbLocation;
use crate::subdevice::Subdevice;

/// What grouping needs to know about a node.
pub trait UsbIdentity {
    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;
    fn interface_number(&self) -> u8;
    /// Bus/address of the owning USB device, when known.
    fn location(&self) -> Option<UsbLocation>;
}

impl UsbIdentity for Subdevice {
    fn vendor_id(&self) -> u16 {
        Subdevice::vendor_id(self)
    }

    fn product_id(&self) -> u16 {
        Subdevice::product_id(self)
    }

    fn interface_number(&self) -> u8 {
        self.interface()
    }

    fn location(&self) -> Option<UsbLocation> {
        Subdevice::location(self)
    }
}

/// Group nodes in enumeration order.
///
/// A node joins the last group when it has the same vendor and product ids
/// and an interface number not yet in that group; otherwise it starts a new
/// group. Order within each group is enumeration order.
pub fn group_by_interface<T: UsbIdentity>(nodes: Vec<T>) -> Vec<Vec<T>> {
    let mut groups: Vec<Vec<T>> = Vec::new();
    for node in nodes {
        let joins_last = groups.last().is_some_and(|group| {
            group.first().is_some_and(|head| {
                head.vendor_id() == node.vendor_id() && head.product_id() == node.product_id()
            }) && group
                .iter()
                .all(|member| member.interface_number() != node.interface_number())
        });
        match groups.last_mut() {
            Some(group) if joins_last => group.push(node),
            _ => groups.push(vec![node]),
        }
    }
    groups
}

/// Reject enumerations where one physical device's nodes were split by
/// another device's nodes.
///
/// Only nodes with a known [`UsbLocation`] are checked. All known locations
/// inside one group must agree. A location may span several adjacent groups
/// (a device whose metadata nodes repeat an interface number), but once a
/// different location has been seen it must not return.
pub fn check_contiguous<T: UsbIdentity>(groups: &[Vec<T>]) -> Result<(), UvcError> {
    for group in groups {
        let mut known = group.iter().filter_map(|node| node.location().map(|loc| (node, loc)));
        let Some((_, first)) = known.next() else {
            continue;
        };
        if let Some((node, _)) = known.find(|&(_, loc)| loc != first) {
            return Err(UvcError::NonContiguousGroup {
                vendor_id: node.vendor_id(),
                product_id: node.product_id(),
            });
        }
    }

    let mut finished: HashSet<UsbLocation> = HashSet::new();
    let mut current: Option<UsbLocation> = None;

    for node in groups.iter().flatten() {
        let Some(location) = node.location() else {
            continue;
        };
        if current == Some(location) {
            continue;
        }
        if finished.contains(&location) {
            return Err(UvcError::NonContiguousGroup {
                vendor_id: node.vendor_id(),
                product_id: node.product_id(),
            });
        }
        if let Some(previous) = current.replace(location) {
            finished.insert(previous);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Node {
        vid: u16,
        pid: u16,
        interface: u8,
        location: Option<(u8, u8)>,
    }

    impl UsbIdentity for Node {
        fn vendor_id(&self) -> u16 {
            self.vid
        }
        fn product_id(&self) -> u16 {
            self.pid
        }
        fn interface_number(&self) -> u8 {
            self.interface
        }
        fn location(&self) -> Option<UsbLocation> {
            self.location.map(|(bus, address)| UsbLocation { bus, address })
        }
    }

    fn node(vid: u16, pid: u16, interface: u8) -> Node {
        Node { vid, pid, interface, location: None }
    }

    fn at(mut node: Node, bus: u8, address: u8) -> Node {
        node.location = Some((bus, address));
        node
    }

    fn shape<T>(groups: &[Vec<T>]) -> Vec<usize> {
        groups.iter().map(Vec::len).collect()
    }

    #[test]
    fn empty_input_gives_no_groups() {
        assert!(group_by_interface(Vec::<Node>::new()).is_empty());
    }

    #[test]
    fn distinct_models_split() {
        let groups = group_by_interface(vec![node(1, 1, 0), node(1, 1, 1), node(1, 2, 0), node(1, 2, 1)]);
        assert_eq!(shape(&groups), [2, 2]);
        assert_eq!(groups[1][0].pid, 2);
    }

    #[test]
    fn repeated_interface_starts_second_device_of_same_model() {
        let groups = group_by_interface(vec![node(1, 1, 0), node(1, 1, 0)]);
        assert_eq!(shape(&groups), [1, 1]);

        let groups = group_by_interface(vec![node(1, 1, 0), node(1, 1, 1), node(1, 1, 2), node(1, 1, 0), node(1, 1, 1)]);
        assert_eq!(shape(&groups), [3, 2]);
    }

    #[test]
    fn group_keeps_enumeration_order() {
        let groups = group_by_interface(vec![node(1, 1, 2), node(1, 1, 0), node(1, 1, 1)]);
        let interfaces: Vec<u8> = groups[0].iter().map(|n| n.interface).collect();
        assert_eq!(interfaces, [2, 0, 1]);
    }

    #[test]
    fn contiguous_devices_pass() {
        let groups = group_by_interface(vec![
            at(node(1, 1, 0), 1, 4),
            at(node(1, 1, 1), 1, 4),
            at(node(1, 1, 0), 1, 5),
        ]);
        assert!(check_contiguous(&groups).is_ok());
    }

    #[test]
    fn one_location_may_span_adjacent_groups() {
        // Metadata nodes share an interface with their stream node.
        let groups = group_by_interface(vec![
            at(node(1, 1, 0), 1, 4),
            at(node(1, 1, 0), 1, 4),
            at(node(1, 2, 0), 2, 2),
        ]);
        assert_eq!(shape(&groups), [1, 1, 1]);
        assert!(check_contiguous(&groups).is_ok());
    }

    #[test]
    fn interleaved_devices_are_rejected() {
        let groups = group_by_interface(vec![
            at(node(1, 1, 0), 1, 4),
            at(node(1, 2, 0), 1, 5),
            at(node(1, 1, 1), 1, 4),
        ]);
        let err = check_contiguous(&groups).unwrap_err();
        assert!(matches!(err, UvcError::NonContiguousGroup { vendor_id: 1, product_id: 1 }));
    }

    #[test]
    fn mixed_locations_in_one_group_are_rejected() {
        // Two cameras of one model, each exposing a single distinct interface.
        let groups = group_by_interface(vec![at(node(1, 1, 0), 1, 4), at(node(1, 1, 1), 1, 5)]);
        assert_eq!(groups.len(), 1);
        let err = check_contiguous(&groups).unwrap_err();
        assert!(matches!(err, UvcError::NonContiguousGroup { vendor_id: 1, product_id: 1 }));
    }

    #[test]
    fn unknown_location_may_join_a_located_group() {
        let groups = group_by_interface(vec![at(node(1, 1, 0), 1, 4), node(1, 1, 1)]);
        assert!(check_contiguous(&groups).is_ok());
    }

    #[test]
    fn unknown_locations_are_not_checked() {
        let groups = group_by_interface(vec![node(1, 1, 0), node(1, 2, 0), node(1, 1, 1)]);
        assert!(check_contiguous(&groups).is_ok());
    }
}
