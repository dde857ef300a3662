//! HTTP 缓存键
//!
//! 键格式：`{prefix}:{path}:{路由参数}:{查询参数}`
//!
//! - 路由参数全部参与，按名称排序
//! - 查询参数只取白名单中的，按名称（同名时按值）排序
//! - 参数以 `k=v` 形式用 `&` 连接，值保持原始编码
//!
//! 相同的请求总是得到相同的键，参数顺序不影响结果。

/// 由请求各部分推导缓存键
pub fn derive_cache_key<K, V>(
    prefix: &str,
    path: &str,
    route_params: impl IntoIterator<Item = (K, V)>,
    query: Option<&str>,
    whitelist: &[String],
) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut route: Vec<(String, String)> = route_params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    route.sort();

    let mut params: Vec<(String, String)> = query
        .map(parse_query)
        .unwrap_or_default()
        .into_iter()
        .filter(|(name, _)| whitelist.iter().any(|allowed| allowed == name))
        .collect();
    params.sort();

    format!(
        "{}:{}:{}:{}",
        prefix,
        path,
        join_pairs(&route),
        join_pairs(&params)
    )
}

/// 拆分查询串，忽略空片段
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
