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

//! The periodic pool cleaner: evicts outdated entries on a cooperative schedule. The task
//! polls its shutdown token between short sleeps so a stop request interrupts promptly.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use log::debug;

use crate::chain_storage::Core;

const LOG_TARGET: &str = "c::mempool::cleaner";

/// Granularity of shutdown polling.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the pool cleaner until `shutdown` flips. Each tick evicts entries past their pool
/// live time through [`Core::clean_pool`], which publishes the `Outdated` notifications.
pub fn spawn_pool_cleaner(core: Arc<Core>, interval: Duration, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut elapsed = Duration::ZERO;
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL.min(interval));
            elapsed += POLL_INTERVAL.min(interval);
            if elapsed < interval {
                continue;
            }
            elapsed = Duration::ZERO;
            let removed = core.clean_pool();
            if !removed.is_empty() {
                debug!(target: LOG_TARGET, "Evicted {} outdated pool transactions", removed.len());
            }
        }
        debug!(target: LOG_TARGET, "Pool cleaner stopped");
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consensus::{Checkpoints, ConsensusConstants};

    #[test]
    fn cleaner_honours_the_shutdown_token() {
        let core = Arc::new(Core::new(ConsensusConstants::for_tests(), Checkpoints::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_pool_cleaner(core, Duration::from_secs(60), shutdown.clone());
        shutdown.store(true, Ordering::SeqCst);
        // joins promptly because the poll interval is short
        handle.join().unwrap();
    }
}
