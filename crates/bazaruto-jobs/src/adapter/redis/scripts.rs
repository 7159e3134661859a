//! Server-side scripts. Each one runs atomically, which is what gives the
//! Redis adapter its single-owner lease guarantee.

use redis::Script;

/// KEYS: queue, processing. ARGV: due score, data prefix, queue name, now (ms), worker id.
const DEQUEUE: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
local data = redis.call('GET', ARGV[2] .. id)
if not data then
    return false
end
local job = cjson.decode(data)
local lease = cjson.encode({
    queue = ARGV[3],
    locked_at_ms = ARGV[4],
    locked_by = ARGV[5],
    attempts = job.attempts
})
redis.call('HSET', KEYS[2], id, lease)
return data
";

/// KEYS: processing. ARGV: id, data prefix, stats prefix, expected attempts.
const COMPLETE: &str = r"
local lease = redis.call('HGET', KEYS[1], ARGV[1])
if not lease then
    return 0
end
lease = cjson.decode(lease)
if tonumber(lease.attempts) ~= tonumber(ARGV[4]) then
    return 0
end
local queue = lease.queue
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('DEL', ARGV[2] .. ARGV[1])
redis.call('HINCRBY', ARGV[3] .. queue, 'completed', 1)
return 1
";

/// KEYS: processing, data, queue. ARGV: id, expected attempts, job JSON, score.
const REQUEUE: &str = r"
local lease = redis.call('HGET', KEYS[1], ARGV[1])
if not lease then
    return 0
end
if tonumber(cjson.decode(lease).attempts) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('SET', KEYS[2], ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
";

/// KEYS: processing, data, dead, stats. ARGV: id, dead job JSON.
const BURY: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
redis.call('DEL', KEYS[2])
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HINCRBY', KEYS[4], 'dead', 1)
return 1
";

/// KEYS: queue. ARGV: data prefix. Leased jobs are not in the queue set and keep their data.
const CLEAR: &str = r"
local ids = redis.call('ZRANGE', KEYS[1], 0, -1)
for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[1] .. id)
end
redis.call('DEL', KEYS[1])
return #ids
";

/// Compiled scripts; hashes are computed once.
pub(super) struct Scripts {
    pub dequeue: Script,
    pub complete: Script,
    pub requeue: Script,
    pub bury: Script,
    pub clear: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            dequeue: Script::new(DEQUEUE),
            complete: Script::new(COMPLETE),
            requeue: Script::new(REQUEUE),
            bury: Script::new(BURY),
            clear: Script::new(CLEAR),
        }
    }
}
