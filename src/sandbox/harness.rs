//! Interpreter-side harness and the result protocol
//!
//! The harness is passed to `node -e`. It reads the snippet from stdin, runs
//! it as the body of an async function with `console.*` redirected into a
//! local buffer, and prints exactly one sentinel-prefixed JSON line with the
//! result. Everything else the child writes to stdout is ignored by the host.

use super::ExecutionResult;

/// Prefix of the line carrying the serialized [`ExecutionResult`]
pub const RESULT_SENTINEL: &str = "__AGENTVISOR_RESULT__";

/// Environment variable carrying the output cap into the child
pub const MAX_OUTPUT_ENV: &str = "AGENTVISOR_MAX_OUTPUT";

/// Harness source. Wrapped in an IIFE so the snippet cannot reach the
/// buffer or the reporter through script scope. Console lines, the
/// `Returned:` line and error messages all stop at the cap, so the report
/// line always fits the host's pipe capture; the host applies the exact cut.
pub const HARNESS_JS: &str = r#"'use strict';
(() => {
  const SENTINEL = '__AGENTVISOR_RESULT__';
  const write = process.stdout.write.bind(process.stdout);
  const limit = Number(process.env.AGENTVISOR_MAX_OUTPUT) || 65536;
  const outputs = [];
  let size = 0;
  let reported = false;

  // Cut to `room` code units without splitting a surrogate pair
  const clip = (text, room) => {
    if (text.length <= room) return text;
    let end = Math.max(room, 0);
    const last = text.charCodeAt(end - 1);
    if (last >= 0xd800 && last <= 0xdbff) end -= 1;
    return text.slice(0, end);
  };
  const push = (line) => {
    if (size > limit) return;
    outputs.push(clip(line, limit - size + 1));
    size += line.length + 1;
  };
  const capture = (...args) => push(args.join(' '));
  for (const level of ['log', 'info', 'warn', 'error', 'debug', 'trace']) {
    console[level] = capture;
  }

  const describe = (error) => {
    if (error instanceof Error) return error.message;
    if (error && typeof error.message === 'string') return error.message;
    return String(error);
  };

  const report = (success, output) => {
    if (reported) return;
    reported = true;
    const text = typeof output.toWellFormed === 'function' ? output.toWellFormed() : output;
    write('\n' + SENTINEL + JSON.stringify({ success, output: text }) + '\n', () => process.exit(0));
  };

  const fail = (error) => report(false, 'Error: ' + clip(describe(error), limit + 1));

  process.on('unhandledRejection', fail);
  process.on('uncaughtException', fail);

  let source = '';
  process.stdin.setEncoding('utf8');
  process.stdin.on('data', (chunk) => { source += chunk; });
  process.stdin.on('end', async () => {
    try {
      const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;
      const fn = new AsyncFunction(source);
      const result = await fn();
      if (result !== undefined) {
        push('Returned: ' + JSON.stringify(result));
      }
      report(true, outputs.join('\n'));
    } catch (error) {
      fail(error);
    }
  });
})();
"#;

/// Extract the harness report from the child's stdout
///
/// The last line starting with the sentinel wins, so a snippet printing a
/// fake report before the harness does cannot spoof the result.
pub fn parse_report(stdout: &str) -> Option<ExecutionResult> {
    let report = stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_SENTINEL))?;
    serde_json::from_str(report.trim()).ok()
}

/// Cap `output` at `max_bytes`, cutting on a char boundary
pub fn truncate_output(output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let omitted = output.len() - cut;
    format!(
        "{}\n...[output truncated, {} bytes omitted]",
        &output[..cut],
        omitted
    )
}

/// Last non-empty stderr line, used when the child dies without reporting
pub fn stderr_tail(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
