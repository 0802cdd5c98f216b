//! 排序规格构建器
//!
//! 每次调用消耗 `self` 并返回新值，不会与之前的构建结果共享内部文档。

use docwire_bson::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_i32(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// 排序规格
///
/// 字段顺序即排序优先级；同名字段再次出现时原位覆盖。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortBy {
    document: Document,
}

impl SortBy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ascending<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.push(keys, SortOrder::Ascending)
    }

    pub fn descending<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.push(keys, SortOrder::Descending)
    }

    /// 按全文检索得分排序：`{ key: { $meta: "textScore" } }`
    pub fn meta_text_score(mut self, key: &str) -> Self {
        self.document
            .insert(key, Document::new().with("$meta", "textScore"));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn to_document(&self) -> Document {
        self.document.clone()
    }

    fn push<I, S>(mut self, keys: I, order: SortOrder) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.document.insert(key.as_ref(), order.as_i32());
        }
        self
    }
}

impl From<SortBy> for Document {
    fn from(sort: SortBy) -> Self {
        sort.document
    }
}
