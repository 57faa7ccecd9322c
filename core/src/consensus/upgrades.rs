// Copyright 2024. The Umbra Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

/// Maps heights to the block major version mandated there. The table is the single source of
/// truth for every feature gate: signature flavour, range proof system, coinbase signature
/// rules and the timestamp window.
#[derive(Debug, Clone)]
pub struct UpgradeManager {
    // ascending by height
    table: Vec<(u8, u32)>,
}

impl UpgradeManager {
    pub fn new(mut table: Vec<(u8, u32)>) -> Self {
        table.sort_by_key(|(_, height)| *height);
        if table.is_empty() || table[0].1 != 0 {
            table.insert(0, (1, 0));
        }
        UpgradeManager { table }
    }

    /// The highest version whose activation height does not exceed `height`.
    pub fn block_major_for(&self, height: u32) -> u8 {
        self.table
            .iter()
            .take_while(|(_, activation)| *activation <= height)
            .map(|(version, _)| *version)
            .last()
            .unwrap_or(1)
    }

    /// The first height at which `version` is active, if it ever activates.
    pub fn activation_height(&self, version: u8) -> Option<u32> {
        self.table
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, height)| *height)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_lookup_respects_the_table() {
        let manager = UpgradeManager::new(vec![(1, 0), (2, 10), (3, 20)]);
        assert_eq!(manager.block_major_for(0), 1);
        assert_eq!(manager.block_major_for(9), 1);
        assert_eq!(manager.block_major_for(10), 2);
        assert_eq!(manager.block_major_for(19), 2);
        assert_eq!(manager.block_major_for(20), 3);
        assert_eq!(manager.block_major_for(1_000_000), 3);
    }

    #[test]
    fn missing_base_entry_is_supplied() {
        let manager = UpgradeManager::new(vec![(2, 10)]);
        assert_eq!(manager.block_major_for(0), 1);
        assert_eq!(manager.block_major_for(10), 2);
    }

    #[test]
    fn activation_heights() {
        let manager = UpgradeManager::new(vec![(1, 0), (2, 10)]);
        assert_eq!(manager.activation_height(2), Some(10));
        assert_eq!(manager.activation_height(7), None);
    }
}
