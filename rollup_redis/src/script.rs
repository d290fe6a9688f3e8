//! Server-side merge script, invoked by content hash.

use redis::aio::ConnectionLike;
use redis::{ErrorKind, RedisResult};
use sha1::{Digest, Sha1};
use tracing::warn;

use rollup_storage::MergeRequest;

/// Lua body of the merge protocol.
///
/// `KEYS[1]` is the bucket; `ARGV` is field, expire-at, value. Records are
/// packed `<Iddd` to match the client-side codec.
pub const MERGE_LUA: &str = r#"
local value = 0 + ARGV[3]
local key = KEYS[1]
local field = ARGV[1]

if redis.call('exists', key) == 1 then
    local data = redis.call('hget', key, field)
    if data then
        local count, sum, min, max = struct.unpack('<Iddd', data)
        sum = sum + value
        if min > value then min = value end
        if max < value then max = value end
        if count < 4294967295 then count = count + 1 end
        redis.call('hset', key, field, struct.pack('<Iddd', count, sum, min, max))
    else
        redis.call('hset', key, field, struct.pack('<Iddd', 1, value, value, value))
    end
else
    redis.call('hset', key, field, struct.pack('<Iddd', 1, value, value, value))
    redis.call('expireat', key, ARGV[2])
end

return 1
"#;

/// A Lua script plus the SHA-1 the server registers it under.
#[derive(Debug, Clone)]
pub struct MergeScript {
    source: &'static str,
    hash: String,
}

impl Default for MergeScript {
    fn default() -> Self {
        Self::new(MERGE_LUA)
    }
}

impl MergeScript {
    /// Wrap a script body.
    pub fn new(source: &'static str) -> Self {
        let hash = format!("{:x}", Sha1::digest(source.as_bytes()));
        Self { source, hash }
    }

    /// Hex SHA-1 of the script body.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Script body.
    pub fn source(&self) -> &str {
        self.source
    }

    fn call(&self, command: &str, body: &str, req: &MergeRequest<'_>) -> redis::Cmd {
        let mut cmd = redis::cmd(command);
        cmd.arg(body)
            .arg(1)
            .arg(req.key)
            .arg(req.sub_step)
            .arg(req.expire_at)
            .arg(req.value);
        cmd
    }

    /// Run the script with `EVALSHA`, resubmitting the body with `EVAL` when
    /// the server no longer has it cached.
    pub async fn invoke<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        req: &MergeRequest<'_>,
    ) -> RedisResult<i64> {
        let reply = self
            .call("EVALSHA", &self.hash, req)
            .query_async::<_, i64>(conn)
            .await;
        match reply {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                warn!(hash = %self.hash, "merge script not cached on server, sending body");
                self.call("EVAL", self.source, req)
                    .query_async::<_, i64>(conn)
                    .await
            }
            other => other,
        }
    }
}
