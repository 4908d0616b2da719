//! Lowest-free-index allocators for per-interface slots and global tickets.

use std::collections::HashMap;

use crate::error::AllocError;

/// Smallest nonnegative integer not present in `used`, scanned by walking
/// the sorted values until the first gap.
fn lowest_free(mut used: Vec<u32>) -> u32 {
    used.sort_unstable();
    let mut candidate = 0;
    for v in used {
        if v != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Per-interface lowest-free slot allocator. A client holds at most one
/// slot across all interfaces at a time.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    max_slots: u32,
    interfaces: HashMap<String, HashMap<String, u32>>,
}

impl SlotAllocator {
    pub fn new(max_slots: u32) -> Self {
        Self {
            max_slots,
            interfaces: HashMap::new(),
        }
    }

    pub fn request(&mut self, interface: &str, client: &str) -> Result<u32, AllocError> {
        let slots = self.interfaces.entry(interface.to_string()).or_default();
        if slots.contains_key(client) {
            return Err(AllocError::DuplicateSlot(client.to_string()));
        }
        let slot = lowest_free(slots.values().copied().collect());
        if slot >= self.max_slots {
            return Err(AllocError::SlotsExhausted(
                interface.to_string(),
                self.max_slots,
            ));
        }
        slots.insert(client.to_string(), slot);
        Ok(slot)
    }

    pub fn get(&self, client: &str) -> Result<u32, AllocError> {
        self.interfaces
            .values()
            .find_map(|slots| slots.get(client).copied())
            .ok_or_else(|| AllocError::UnknownClient(client.to_string()))
    }

    pub fn release(&mut self, client: &str) -> Result<u32, AllocError> {
        for slots in self.interfaces.values_mut() {
            if let Some(slot) = slots.remove(client) {
                return Ok(slot);
            }
        }
        Err(AllocError::UnknownClient(client.to_string()))
    }
}

/// Largest ticket whose class id (`ticket * 10`, decimal) still fits in a
/// `u32`.
const MAX_TICKET: u32 = u32::MAX / 10;

/// Global lowest-free-positive-integer ticket allocator.
#[derive(Debug, Default)]
pub struct TicketAllocator {
    clients: HashMap<String, u32>,
}

impl TicketAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, client: &str) -> Result<u32, AllocError> {
        if self.clients.contains_key(client) {
            return Err(AllocError::DuplicateTicket(client.to_string()));
        }
        // Lowest free *positive* integer: shift the gap search by one.
        let shifted: Vec<u32> = self.clients.values().map(|t| t - 1).collect();
        let ticket = lowest_free(shifted) + 1;
        if ticket > MAX_TICKET {
            return Err(AllocError::TicketOverflow);
        }
        self.clients.insert(client.to_string(), ticket);
        Ok(ticket)
    }

    pub fn get(&self, client: &str) -> Result<u32, AllocError> {
        self.clients
            .get(client)
            .copied()
            .ok_or_else(|| AllocError::UnknownClient(client.to_string()))
    }

    pub fn release(&mut self, client: &str) -> Result<u32, AllocError> {
        self.clients
            .remove(client)
            .ok_or_else(|| AllocError::UnknownClient(client.to_string()))
    }
}
