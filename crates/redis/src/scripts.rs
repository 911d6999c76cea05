//! Server-side Lua scripts.
//!
//! Both scripts run atomically on their shard. `redis::Script` invokes by
//! SHA and transparently reloads on a NOSCRIPT reply, so scripts are loaded
//! lazily on first use per server.

use once_cell::sync::Lazy;
use redis::Script;

/// Atomic bounded push: refuse when the list is at capacity, otherwise
/// append and refresh the key TTL.
///
/// KEYS[1] = channel list key
/// ARGV[1] = capacity, ARGV[2] = payload, ARGV[3] = expiry seconds
///
/// Returns 1 when pushed, 0 when the channel is full.
pub static BOUNDED_PUSH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('LLEN', KEYS[1]) < tonumber(ARGV[1]) then
            redis.call('RPUSH', KEYS[1], ARGV[2])
            redis.call('EXPIRE', KEYS[1], ARGV[3])
            return 1
        end
        return 0
        ",
    )
});

/// Atomic group fan-out for the members living on one shard: bounded-push
/// the same payload onto every member list in a single round trip.
///
/// KEYS[i]     = member channel list keys
/// ARGV[1]     = expiry seconds, ARGV[2] = payload
/// ARGV[i + 2] = capacity for KEYS[i]
///
/// Returns the number of members that accepted the payload; full members
/// are skipped.
pub static GROUP_FAN_OUT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local pushed = 0
        for i = 1, #KEYS do
            if redis.call('LLEN', KEYS[i]) < tonumber(ARGV[i + 2]) then
                redis.call('RPUSH', KEYS[i], ARGV[2])
                redis.call('EXPIRE', KEYS[i], ARGV[1])
                pushed = pushed + 1
            end
        end
        return pushed
        ",
    )
});
