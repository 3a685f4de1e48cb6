//! Unsolicited advertisement pacing (RFC 4861 §6.2.4).

use std::time::Duration;

use rand::Rng;

/// Cap on the interval between the first few unsolicited advertisements.
pub const MAX_INITIAL_RTR_ADVERT_INTERVAL: Duration = Duration::from_secs(16);

/// How many advertisements the initial cap applies to.
pub const MAX_INITIAL_RTR_ADVERTISEMENTS: u32 = 3;

/// Delay before unsolicited advertisement number `i + 1`.
///
/// Uniform in `[min, max]`, rounded to the nearest second. The first
/// `MAX_INITIAL_RTR_ADVERTISEMENTS` delays are capped so a freshly started
/// router converges quickly.
pub fn multicast_delay<R: Rng + ?Sized>(
    rng: &mut R,
    i: u32,
    min: Duration,
    max: Duration,
) -> Duration {
    let mut delay = if min >= max {
        max
    } else {
        rng.gen_range(min..=max)
    };
    if i < MAX_INITIAL_RTR_ADVERTISEMENTS && delay > MAX_INITIAL_RTR_ADVERT_INTERVAL {
        delay = MAX_INITIAL_RTR_ADVERT_INTERVAL;
    }
    round_to_second(delay)
}

fn round_to_second(d: Duration) -> Duration {
    let secs = d.as_secs() + u64::from(d.subsec_millis() >= 500);
    Duration::from_secs(secs)
}
