//! 注入页面执行的脚本。带参数的脚本由 `wrap_with_args` 拼出
//! `(() => { const args = {...}; <body> })()`，脚本体通过 `args` 读取参数。
//!
//! 查找到的元素保存在顶层窗口的 `window.__gcNodes` 中，元素句柄就是数组下标；
//! `args.path` 是已进入的 iframe 句柄链，用来定位当前 frame 的 document。

/// 根据 `args.path` 解析当前 frame 的 document，结果放在 `doc`
pub const FRAME_DOC_PRELUDE: &str = r#"
    const reg = (window.__gcNodes = window.__gcNodes || []);
    let doc = document;
    for (const h of (args.path || [])) {
        const frame = reg[h];
        if (!frame || !frame.contentDocument) {
            throw new Error('iframe 不可访问: ' + h);
        }
        doc = frame.contentDocument;
    }
"#;

pub const FIND_ELEMENTS_JS: &str = r#"
    const scope = args.scope === null ? doc : reg[args.scope];
    if (!scope) {
        return [];
    }
    let nodes = [];
    const sel = args.selector;
    switch (args.by) {
        case 'id':
            nodes = Array.from(scope.querySelectorAll('[id="' + sel.replace(/"/g, '\\"') + '"]'));
            break;
        case 'class':
            nodes = Array.from(scope.getElementsByClassName(sel));
            break;
        case 'tag':
            nodes = Array.from(scope.getElementsByTagName(sel));
            break;
        case 'css':
            nodes = Array.from(scope.querySelectorAll(sel));
            break;
        case 'xpath': {
            const snap = doc.evaluate(sel, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (let i = 0; i < snap.snapshotLength; i++) {
                const n = snap.snapshotItem(i);
                if (n && n.nodeType === 1) {
                    nodes.push(n);
                }
            }
            break;
        }
    }
    return nodes.map(n => {
        reg.push(n);
        return {
            handle: reg.length - 1,
            tag: n.tagName.toLowerCase(),
            id: n.id || null,
            name: n.getAttribute('name'),
            src: n.getAttribute('src'),
            class: n.getAttribute('class'),
            text: (n.tagName === 'INPUT' ? n.value : (n.innerText !== undefined ? n.innerText : n.textContent)) || ''
        };
    });
"#;

pub const FRAME_ACCESSIBLE_JS: &str = r#"
    const frame = reg[args.handle];
    return !!(frame && frame.contentDocument);
"#;

pub const CLICK_HANDLE_JS: &str = r#"
    const el = reg[args.handle];
    if (!el) {
        return false;
    }
    el.click();
    return true;
"#;

pub const RESET_REGISTRY_JS: &str = r#"
    window.__gcNodes = [];
    return true;
"#;

pub const PAGE_SOURCE_JS: &str = r#"
    return doc.documentElement ? doc.documentElement.outerHTML : '';
"#;

/// 在当前 frame 内执行，`document` 已被替换成 frame 的文档
pub const BODY_TEXT_JS: &str = "return document.body ? document.body.innerText : '';";

pub const DOCUMENT_READY_JS: &str = r#"
    () => document.readyState !== 'loading' && !!document.body
"#;

/// 点击第一个文本（或 value）与候选之一相同的链接/按钮
pub const CLICK_BY_TEXT_JS: &str = r#"
    const wanted = args.candidates.map(c => c.trim().toLowerCase());
    const nodes = Array.from(document.querySelectorAll(
        "a, button, input[type='submit'], input[type='button']"
    ));
    for (const n of nodes) {
        const label = ((n.innerText || n.value || '') + '').trim().toLowerCase();
        if (wanted.includes(label)) {
            n.click();
            return true;
        }
    }
    return false;
"#;

/// 判断是否存在文本与候选之一相同的链接
pub const LINK_EXISTS_JS: &str = r#"
    const wanted = args.candidates.map(c => c.trim().toLowerCase());
    return Array.from(document.querySelectorAll('a'))
        .some(a => wanted.includes((a.innerText || '').trim().toLowerCase()));
"#;

/// 把参数和脚本体拼成立即执行的表达式
pub fn wrap_with_args(args: &serde_json::Value, body: &str) -> String {
    format!("(() => {{ const args = {}; {} }})()", args, body)
}

/// 先解析 frame 文档再执行脚本体
pub fn wrap_in_frame(args: &serde_json::Value, body: &str) -> String {
    wrap_with_args(args, &format!("{}\n{}", FRAME_DOC_PRELUDE, body))
}

/// 用户脚本在 frame 文档中执行，`document`/`window` 指向当前 frame
pub fn wrap_user_script(args: &serde_json::Value, script: &str) -> String {
    wrap_in_frame(
        args,
        &format!(
            "return (function(document, window) {{ {} }})(doc, doc.defaultView);",
            script
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_with_args_embeds_json() {
        let js = wrap_with_args(&json!({ "candidates": ["Classes"] }), LINK_EXISTS_JS);
        assert!(js.starts_with("(() => { const args = {\"candidates\":[\"Classes\"]};"));
        assert!(js.trim_end().ends_with("})()"));
    }

    #[test]
    fn test_wrap_user_script_resolves_frame_first() {
        let js = wrap_user_script(&json!({ "path": [3] }), BODY_TEXT_JS);
        let prelude_at = js.find("contentDocument").unwrap();
        let script_at = js.find("document.body.innerText").unwrap();
        assert!(prelude_at < script_at);
    }
}
