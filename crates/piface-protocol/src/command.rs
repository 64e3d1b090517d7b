//! 命令文法解析
//!
//! 请求是一个斜杠分隔的字符串，形如 `/md/0/Forward`。第 0 段是
//! 前导斜杠产生的空串，固定忽略；第 1 段是命令名；其余是位置参数。
//! 参数的类型转换（整数、布尔、枚举）由各命令自己做，这里只切分。

/// 一条解析后的请求
///
/// 借用原始请求串，生命周期跟随输入。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// 命令名（第 1 段；请求不足两段时为空串）
    pub command: &'a str,
    /// 位置参数（第 2 段起）
    pub args: Vec<&'a str>,
}

impl<'a> Request<'a> {
    /// 按斜杠切分请求串
    ///
    /// # Example
    ///
    /// ```
    /// use piface_protocol::Request;
    ///
    /// let req = Request::parse("/mp/1/4");
    /// assert_eq!(req.command, "mp");
    /// assert_eq!(req.args, vec!["1", "4"]);
    /// ```
    pub fn parse(raw: &'a str) -> Self {
        let mut segments = raw.split('/');
        let _ = segments.next(); // 前导斜杠的空段
        let command = segments.next().unwrap_or("");
        Self {
            command,
            args: segments.collect(),
        }
    }
}
