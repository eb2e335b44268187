//! Internal testing utilities for the shapetrace crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Utility for creating parametrized (aka. table-driven) tests.
///
/// To create a table driven test:
///
/// 1. Import the `TestCases` trait
/// 2. Create a struct, conventionally named `Case`, that holds the data for
///    a single test case. This struct must implement `Debug`.
/// 3. Create a collection of `Case` instances, conventionally named `cases`.
/// 4. Call `cases.test_each`, passing the test function as a closure
///
/// `test_each` runs every case and catches panics. If all cases succeed it
/// returns normally, otherwise it panics with the debug representations of
/// the failing cases.
///
/// ## Example
///
/// ```
/// use shapetrace_testing::TestCases;
///
/// // Add #[test] attribute
/// fn test_multiply() {
///   #[derive(Debug)]
///   struct Case {
///     a: i32,
///     b: i32,
///     expected: i32,
///   }
///
///   let cases = [
///     Case { a: 3, b: 5, expected: 15 },
///   ];
///
///   cases.test_each(|&Case { a, b, expected }| {
///     assert_eq!(a * b, expected);
///   });
/// }
/// # test_multiply();
/// ```
///
/// Cases are passed to the test function by reference so that a failing
/// case can be reported after the panic. If an owned case is more
/// convenient, use `test_each_clone` at the cost of a clone per case.
///
/// Both test cases and the test function must be
/// [unwind safe](https://doc.rust-lang.org/std/panic/fn.catch_unwind.html).
/// If a field is not unwind safe, either replace it with a description of
/// how to construct the value inside the test function, or wrap it with
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call test function `test` with each test case in `self`, catching any
    /// panics.
    ///
    /// After all cases have been evaluated, return if no panics occurred or
    /// panic with details of failing cases otherwise.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes a clone
    /// of each test case to the test function, rather than a reference.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;
}

/// Panic with a report of the cases which failed, if any did.
fn report_failures(failures: Vec<String>) {
    if failures.is_empty() {
        return;
    }
    let mut report = format!("{} test cases failed:", failures.len());
    for failure in failures {
        report.push_str("\n  ");
        report.push_str(&failure);
    }
    panic!("{}", report);
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .map(|case| format!("{:?}", case))
            .collect();
        report_failures(failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let value = case.clone();
            let test = &test;
            if std::panic::catch_unwind(move || test(value)).is_err() {
                failures.push(format!("{:?}", case));
            }
        }
        report_failures(failures);
    }
}
