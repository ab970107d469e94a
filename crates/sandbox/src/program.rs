//! Generated TypeScript wrapped around user code: a loopback RPC client,
//! one proxy object per tool group, then the snippet itself.

use serde_json::Value;
use std::net::SocketAddr;

use codemode_core::ToolGroup;

/// URL of the loopback `callTool` endpoint.
pub fn rpc_url(addr: SocketAddr) -> String {
    format!("http://{}/rpc", addr)
}

/// Client stub exposing `__callTool(ref, args)` and `__toolProxy`.
///
/// Failed calls throw with the bridge's error text so snippets can
/// `try`/`catch` them like any other rejection. Proxies forward members they
/// do not know to the bridge, which answers with "Tool not found".
pub fn rpc_stub(url: &str) -> String {
    format!(
        r#"const __RPC_URL = {url};
let __rpcId = 0;
async function __callTool(toolRef: string, args: unknown): Promise<any> {{
  const response = await fetch(__RPC_URL, {{
    method: "POST",
    headers: {{ "Content-Type": "application/json" }},
    body: JSON.stringify({{
      jsonrpc: "2.0",
      id: ++__rpcId,
      method: "callTool",
      params: [toolRef, args ?? {{}}],
    }}),
  }});
  const payload = await response.json();
  if (payload.error) {{
    throw new Error(payload.error.message);
  }}
  const result = payload.result;
  if (!result.success) {{
    throw new Error(result.error);
  }}
  return result.data;
}}

function __toolProxy(namespace: string, tools: Record<string, (args?: unknown) => Promise<any>>): any {{
  return new Proxy(tools, {{
    get(target, prop) {{
      if (typeof prop !== "string" || prop === "then") {{
        return undefined;
      }}
      if (prop in target) {{
        return target[prop];
      }}
      return (args?: unknown) => __callTool(`${{namespace}}.${{prop}}`, args);
    }},
  }});
}}
"#,
        url = js_string(url)
    )
}

/// `const <local_name> = __toolProxy("<namespace>", { tool: (args) => __callTool("<ref>", args) });`
pub fn proxy_object(group: &ToolGroup) -> String {
    let mut out = format!(
        "const {} = __toolProxy({}, {{\n",
        group.local_name,
        js_string(&group.namespace)
    );
    for tool in &group.tools {
        out.push_str(&format!(
            "  {}: (args?: Record<string, unknown>) => __callTool({}, args),\n",
            tool.identifier,
            js_string(&tool.reference_name)
        ));
    }
    out.push_str("});\n");
    out
}

/// The complete program run by the sandbox.
pub fn assemble_program(url: &str, groups: &[ToolGroup], code: &str) -> String {
    let mut program = rpc_stub(url);
    for group in groups {
        program.push('\n');
        program.push_str(&proxy_object(group));
    }
    program.push('\n');
    program.push_str(code);
    if !code.ends_with('\n') {
        program.push('\n');
    }
    program
}

fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}
