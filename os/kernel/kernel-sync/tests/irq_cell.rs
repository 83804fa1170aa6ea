use kernel_sync::{IrqCell, Reentered};

#[test]
fn try_with_mutates_and_returns() {
    let cell = IrqCell::new(vec![1, 2, 3]);
    let len = cell
        .try_with(|v| {
            v.push(4);
            v.len()
        })
        .unwrap();
    assert_eq!(len, 4);

    // the cell must be free again
    let sum: i32 = cell.try_with(|v| v.iter().sum()).unwrap();
    assert_eq!(sum, 10);
}

#[test]
fn recursion_is_reported_not_aliased() {
    let cell = IrqCell::new(0_u32);
    let inner = cell
        .try_with(|outer| {
            *outer = 7;
            cell.try_with(|v| *v += 1)
        })
        .unwrap();
    assert_eq!(inner, Err(Reentered));
    assert_eq!(cell.try_with(|v| *v).unwrap(), 7);
}

#[test]
fn get_mut_allows_direct_mutation() {
    let mut cell = IrqCell::new(String::from("a"));
    cell.get_mut().push('b');
    assert_eq!(cell.try_with(|s| s.clone()).unwrap(), "ab");
}
