/// Path processing utility functions / 路径处理工具函数
///
/// Logical paths always look like `/a/b`; object keys never start with `/`.

/// Clean and normalize path / 清理和规范化路径
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Ensure path starts with / / 确保路径以 / 开头
/// 3. Clean . and .. in path / 清理路径中的 . 和 ..
pub fn fix_and_clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            // Never climbs above the root / 不会越过根目录
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Join root prefix and logical path into an object key / 拼接根前缀与逻辑路径得到对象键
///
/// `join_key("data", "/a/b.txt") == "data/a/b.txt"`, `join_key("/", "/") == ""`
pub fn join_key(root: &str, path: &str) -> String {
    let root = root.trim_matches('/');
    let cleaned = fix_and_clean_path(path);
    let path = cleaned.trim_start_matches('/');

    if root.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, path)
    }
}

/// Key prefix of a directory (with trailing `/`, empty for the bucket root) / 目录前缀
pub fn dir_prefix(root: &str, path: &str) -> String {
    let key = join_key(root, path);
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// Strip root prefix from an object key back to a logical path / 从对象键还原逻辑路径
///
/// Keys outside the root are returned cleaned but otherwise untouched.
pub fn strip_root(root: &str, key: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        return fix_and_clean_path(key);
    }
    let relative = match key.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => key,
    };
    fix_and_clean_path(relative)
}
