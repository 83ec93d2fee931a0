// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Show example retry intervals and times for the registration policy

use nodeadm_common::backoff;
use nodeadm_common::backoff::Backoff;
use std::time::Duration;

fn main() {
    let bound = Duration::from_secs(15 * 60);
    let mut policy = backoff::registration_policy(bound);
    let mut total_duration = Duration::from_secs(0);
    while let Some(next) = policy.next_backoff() {
        let nmin = total_duration.as_secs() / 60;
        let nsecs = total_duration.as_secs() % 60;
        let nmillis = total_duration.as_millis() % 1000;
        print!("at T={:3}m{:02}.{:03}s: ", nmin, nsecs, nmillis);

        let nmin = next.as_secs() / 60;
        let nsecs = next.as_secs() % 60;
        let nmillis = next.as_millis() % 1000;
        println!("wait {:3}m{:02}.{:03}s", nmin, nsecs, nmillis);
        total_duration += next;

        // The policy measures wall-clock time; stop once the simulated total
        // passes the bound rather than sleeping through it.
        if total_duration >= bound {
            break;
        }
    }
}
